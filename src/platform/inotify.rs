//! Linux inotify backend.
//!
//! Readiness, reads and close go through nix's safe wrappers. Only the two
//! inotify entry points and the FIONREAD size query have no safe binding and
//! are called directly. Every call goes through
//! [`gate`](crate::platform::gate) so interrupted calls are retried and other
//! failures carry their errno.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::fs;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd;

use crate::core::errors::{KslError, Result};
use crate::platform::gate::{retry_interrupted, syscall};
use crate::watch::WatchDescriptor;
use crate::watch::backend::WatchBackend;
use crate::watch::mask::EventMask;
use crate::watch::session::OpenOptions;

nix::ioctl_read_bad!(
    /// Bytes currently queued on an inotify descriptor.
    pending_bytes,
    libc::FIONREAD,
    libc::c_int
);

const MAX_QUEUED_EVENTS: &str = "/proc/sys/fs/inotify/max_queued_events";

/// An open inotify instance. The descriptor is closed on drop if
/// [`WatchBackend::close`] was not called.
#[derive(Debug)]
pub struct InotifyBackend {
    fd: OwnedFd,
}

impl InotifyBackend {
    /// Create a new inotify instance.
    pub fn init(options: OpenOptions) -> Result<Self> {
        let mut flags = 0;
        if !options.inheritable {
            flags |= libc::IN_CLOEXEC;
        }
        if options.nonblocking {
            flags |= libc::IN_NONBLOCK;
        }
        let raw = syscall("inotify_init1", || {
            Errno::result(unsafe { libc::inotify_init1(flags) })
        })?;
        // SAFETY: inotify_init1 returned a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }
}

impl WatchBackend for InotifyBackend {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchDescriptor> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| KslError::Path {
            path: path.to_path_buf(),
            errno: libc::EINVAL,
        })?;
        let fd = self.fd.as_raw_fd();
        let raw = retry_interrupted(|| {
            Errno::result(unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), mask.bits()) })
        })
        .map_err(|errno| match errno {
            Errno::ENOSPC | Errno::ENOMEM | Errno::EBADF => KslError::Resource {
                operation: "inotify_add_watch",
                errno: errno as i32,
            },
            _ => KslError::Path {
                path: path.to_path_buf(),
                errno: errno as i32,
            },
        })?;
        Ok(WatchDescriptor::from_raw(raw))
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let timeout = timeout.map_or(PollTimeout::NONE, |t| {
            let ms = i32::try_from(t.as_millis()).unwrap_or(i32::MAX);
            PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
        });
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let ready = syscall("poll", || poll(&mut fds, timeout))?;
        Ok(ready > 0
            && fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN)))
    }

    fn available_bytes(&mut self) -> Result<usize> {
        let fd = self.fd.as_raw_fd();
        let mut pending: libc::c_int = 0;
        // SAFETY: `fd` is a live inotify descriptor and `pending` outlives the call.
        syscall("ioctl(FIONREAD)", || unsafe {
            pending_bytes(fd, &raw mut pending)
        })?;
        Ok(usize::try_from(pending).unwrap_or(0))
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let fd = self.fd.as_raw_fd();
        let mut buf = vec![0_u8; len];
        let read = syscall("read", || unistd::read(fd, &mut buf));
        match read {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // Another reader emptied the queue between FIONREAD and read.
            Err(KslError::Resource { errno, .. }) if errno == Errno::EAGAIN as i32 => {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn close(self) -> Result<()> {
        // Not retried: after EINTR the descriptor state is unspecified on
        // Linux and it has already been released.
        unistd::close(self.fd.into_raw_fd()).map_err(|errno| KslError::Resource {
            operation: "close",
            errno: errno as i32,
        })
    }
}

/// Kernel limit on queued events per instance, if readable.
#[must_use]
pub fn max_queued_events() -> Option<u64> {
    fs::read_to_string(MAX_QUEUED_EVENTS)
        .ok()
        .and_then(|text| text.trim().parse().ok())
}
