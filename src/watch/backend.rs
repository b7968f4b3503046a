//! Capability seam between the watch session and the kernel.
//!
//! The Linux implementation lives in [`crate::platform::inotify`]. The
//! [`ScriptedBackend`] below replays prepared event bytes and is what the
//! test suites drive the session, coordinator and planner with.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{KslError, Result};
use crate::watch::WatchDescriptor;
use crate::watch::decoder::encode_record;
use crate::watch::mask::EventMask;

/// The four kernel operations the session depends on. Opening is the
/// implementor's constructor.
pub trait WatchBackend {
    /// Register `path` for the events in `mask`.
    ///
    /// Registering the same path again must yield the same descriptor.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchDescriptor>;

    /// Block until events are pending or `timeout` elapses. `None` waits
    /// indefinitely; `Some(Duration::ZERO)` only checks.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Exact number of bytes the next read would return.
    fn available_bytes(&mut self) -> Result<usize>;

    /// One read of up to `len` bytes. Only whole records are returned.
    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Release the handle, reporting failure.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// In-memory backend with a scripted arrival schedule.
///
/// Each call to `wait_readable` delivers the next scheduled burst into the
/// pending queue, mimicking events trickling in while a build runs.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    next_descriptor: i32,
    watches: HashMap<PathBuf, WatchDescriptor>,
    registrations: Vec<(PathBuf, EventMask)>,
    arrivals: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    reads: usize,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_descriptor: 1,
            ..Self::default()
        }
    }

    /// Schedule raw bytes to arrive on a later wait.
    pub fn schedule(&mut self, bytes: Vec<u8>) {
        self.arrivals.push_back(bytes);
    }

    /// Make bytes immediately readable, as if they were already queued.
    pub fn preload(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Schedule one open event for `name` under the watch on `dir`.
    ///
    /// Panics if `dir` was never registered.
    pub fn schedule_open(&mut self, dir: &Path, name: &str) {
        let wd = self.descriptor_for(dir).unwrap_or_else(|| {
            panic!("no watch registered for {}", dir.display());
        });
        self.schedule(encode_record(wd.raw(), EventMask::OPEN, 0, name.as_bytes()));
    }

    /// Descriptor handed out for `path`, if registered.
    #[must_use]
    pub fn descriptor_for(&self, path: &Path) -> Option<WatchDescriptor> {
        self.watches.get(path).copied()
    }

    /// Every `add_watch` call in order, including repeats.
    #[must_use]
    pub fn registrations(&self) -> &[(PathBuf, EventMask)] {
        &self.registrations
    }

    /// Number of successful reads.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Bytes not yet delivered to the pending queue.
    #[must_use]
    pub fn undelivered(&self) -> usize {
        self.arrivals.iter().map(Vec::len).sum()
    }
}

impl WatchBackend for ScriptedBackend {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchDescriptor> {
        match fs::metadata(path) {
            Ok(meta) if mask.contains(EventMask::WATCH_ONLY_IF_DIR) && !meta.is_dir() => {
                return Err(KslError::Path {
                    path: path.to_path_buf(),
                    errno: libc::ENOTDIR,
                });
            }
            Ok(_) => {}
            Err(err) => {
                let errno = match err.kind() {
                    ErrorKind::NotFound => libc::ENOENT,
                    ErrorKind::PermissionDenied => libc::EACCES,
                    _ => err.raw_os_error().unwrap_or(libc::EIO),
                };
                return Err(KslError::Path {
                    path: path.to_path_buf(),
                    errno,
                });
            }
        }

        self.registrations.push((path.to_path_buf(), mask));
        if let Some(existing) = self.watches.get(path) {
            return Ok(*existing);
        }
        let wd = WatchDescriptor::from_raw(self.next_descriptor.max(1));
        self.next_descriptor = wd.raw() + 1;
        self.watches.insert(path.to_path_buf(), wd);
        Ok(wd)
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.pending.is_empty() {
            if let Some(burst) = self.arrivals.pop_front() {
                self.pending.extend(burst);
            } else if let Some(limit) = timeout {
                // Nothing scheduled: behave like an idle kernel queue without
                // stalling the test for the full poll interval.
                std::thread::sleep(limit.min(Duration::from_millis(5)));
            }
        }
        Ok(!self.pending.is_empty())
    }

    fn available_bytes(&mut self) -> Result<usize> {
        Ok(self.pending.len())
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let take = len.min(self.pending.len());
        self.reads += 1;
        Ok(self.pending.drain(..take).collect())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_yields_same_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = ScriptedBackend::new();
        let first = backend.add_watch(dir.path(), EventMask::REDUCTION).unwrap();
        let second = backend.add_watch(dir.path(), EventMask::REDUCTION).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.registrations().len(), 2);
    }

    #[test]
    fn missing_path_is_a_path_error() {
        let mut backend = ScriptedBackend::new();
        let err = backend
            .add_watch(Path::new("/nonexistent/kslim/tree"), EventMask::REDUCTION)
            .expect_err("missing path");
        assert!(matches!(err, KslError::Path { errno, .. } if errno == libc::ENOENT));
    }

    #[test]
    fn only_dir_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.c");
        fs::write(&file, "int a;").unwrap();
        let mut backend = ScriptedBackend::new();
        let err = backend
            .add_watch(&file, EventMask::REDUCTION)
            .expect_err("file under ONLYDIR");
        assert!(matches!(err, KslError::Path { errno, .. } if errno == libc::ENOTDIR));
    }

    #[test]
    fn arrivals_are_delivered_one_burst_per_wait() {
        let mut backend = ScriptedBackend::new();
        backend.schedule(vec![1; 16]);
        backend.schedule(vec![2; 32]);

        assert!(backend.wait_readable(Some(Duration::ZERO)).unwrap());
        assert_eq!(backend.available_bytes().unwrap(), 16);
        assert_eq!(backend.read_exact(16).unwrap().len(), 16);

        assert!(backend.wait_readable(Some(Duration::ZERO)).unwrap());
        assert_eq!(backend.available_bytes().unwrap(), 32);
        assert_eq!(backend.undelivered(), 0);
    }
}
