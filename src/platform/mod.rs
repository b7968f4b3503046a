//! Platform layer: interrupt-safe syscall wrapper and the Linux watch binding.

pub mod gate;
#[cfg(target_os = "linux")]
pub mod inotify;
