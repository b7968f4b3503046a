//! Watch session: owns the kernel handle, the descriptor registry and the
//! raw event buffer for the lifetime of one supervised build.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::Result;
use crate::watch::WatchDescriptor;
use crate::watch::backend::WatchBackend;
use crate::watch::mask::EventMask;
use crate::watch::stream::EventBuffer;

/// How the kernel handle is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Let child processes inherit the handle (drops close-on-exec).
    pub inheritable: bool,
    /// Open the handle in non-blocking mode.
    pub nonblocking: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            inheritable: false,
            nonblocking: true,
        }
    }
}

/// One watch session over a directory tree.
///
/// Paths are registered relative to `base`; `"."` is the tree root and its
/// descriptor is the session's root descriptor. The handle is released when
/// the session is closed or dropped, whichever comes first.
pub struct WatchSession<B: WatchBackend> {
    pub(crate) backend: B,
    base: PathBuf,
    paths: HashMap<WatchDescriptor, PathBuf>,
    root: Option<WatchDescriptor>,
    pub(crate) buffer: EventBuffer,
}

#[cfg(target_os = "linux")]
impl WatchSession<crate::platform::inotify::InotifyBackend> {
    /// Acquire an inotify handle for the tree at `base`.
    pub fn open(base: impl Into<PathBuf>, options: OpenOptions) -> Result<Self> {
        let backend = crate::platform::inotify::InotifyBackend::init(options)?;
        Ok(Self::with_backend(base, backend))
    }
}

impl<B: WatchBackend> WatchSession<B> {
    /// Wrap an already-open backend.
    pub fn with_backend(base: impl Into<PathBuf>, backend: B) -> Self {
        Self {
            backend,
            base: base.into(),
            paths: HashMap::new(),
            root: None,
            buffer: EventBuffer::default(),
        }
    }

    /// Register `path` (relative to the session base) and record its
    /// descriptor.
    ///
    /// The kernel hands back the existing descriptor when a path is watched
    /// twice; the first recorded path for a descriptor is kept so that
    /// translation stays stable.
    pub fn add_watch(&mut self, path: impl AsRef<Path>, mask: EventMask) -> Result<WatchDescriptor> {
        let logical = normalize(path.as_ref());
        let target = if logical == Path::new(".") {
            self.base.clone()
        } else {
            self.base.join(&logical)
        };

        let wd = self.backend.add_watch(&target, mask)?;
        match self.paths.get(&wd) {
            Some(existing) if existing != &logical => {
                eprintln!(
                    "[KSL-WATCH] {} aliases {} ({wd}); keeping the first path",
                    logical.display(),
                    existing.display()
                );
            }
            Some(_) => {}
            None => {
                if logical == Path::new(".") {
                    self.root = Some(wd);
                }
                self.paths.insert(wd, logical);
            }
        }
        Ok(wd)
    }

    /// Directory registered under `wd`, relative to the base.
    #[must_use]
    pub fn path_of(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.paths.get(&wd).map(PathBuf::as_path)
    }

    #[must_use]
    pub fn root(&self) -> Option<WatchDescriptor> {
        self.root
    }

    #[must_use]
    pub fn is_root(&self, wd: WatchDescriptor) -> bool {
        self.root == Some(wd)
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.paths.len()
    }

    /// Raw chunks captured so far.
    #[must_use]
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release the kernel handle.
    pub fn close(self) -> Result<()> {
        self.backend.close()
    }
}

/// Canonical relative spelling: `./a/b/` and `a/b` are the same watch, and
/// an empty path means the root.
fn normalize(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}
