//! Interrupt-safe wrapper for sentinel-returning system calls.
//!
//! Calls are expressed as closures yielding `nix::Result<T>` (a nix wrapper,
//! or `Errno::result` around a raw call), which classifies the `-1`
//! sentinel by `errno`. `EINTR` is retried in place; anything else is
//! surfaced with its numeric reason.

use nix::errno::Errno;

use crate::core::errors::{KslError, Result};

/// Run `call` until it completes without `EINTR`.
///
/// There is no backoff: an interrupted call has done no work and signals are
/// routine while a build child is running.
pub fn retry_interrupted<T, F>(mut call: F) -> nix::Result<T>
where
    F: FnMut() -> nix::Result<T>,
{
    loop {
        match call() {
            Err(Errno::EINTR) => {}
            other => return other,
        }
    }
}

/// [`retry_interrupted`], mapping any remaining failure to a resource error
/// tagged with the operation name.
pub fn syscall<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: FnMut() -> nix::Result<T>,
{
    retry_interrupted(call).map_err(|errno| KslError::Resource {
        operation,
        errno: errno as i32,
    })
}
