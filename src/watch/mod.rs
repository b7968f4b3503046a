//! Kernel watch layer: session ownership, event capture and decoding.

pub mod backend;
pub mod decoder;
pub mod mask;
pub mod session;
pub mod stream;

use std::fmt;

/// Kernel-assigned handle for one monitored directory within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchDescriptor(i32);

impl WatchDescriptor {
    /// Marker the kernel uses when an event cannot be tied to any watch
    /// (queue overflow).
    pub const LOST: Self = Self(-1);

    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd{}", self.0)
    }
}
