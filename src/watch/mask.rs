//! Event mask bits understood by the watch layer.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitset selecting which event kinds a watch reports.
///
/// Values are the Linux inotify ABI constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// A file or directory was opened.
    pub const OPEN: Self = Self(0x0000_0020);
    /// The kernel event queue overflowed; reported with descriptor -1.
    pub const QUEUE_OVERFLOW: Self = Self(0x0000_4000);
    /// The watch was removed (explicitly or because its target vanished).
    pub const IGNORED: Self = Self(0x0000_8000);
    /// Only register the watch if the path is a directory.
    pub const WATCH_ONLY_IF_DIR: Self = Self(0x0100_0000);
    /// Stop reporting events for children once they are unlinked.
    pub const EXCLUDE_UNLINK: Self = Self(0x0400_0000);
    /// The subject of the event is a directory.
    pub const IS_DIR: Self = Self(0x4000_0000);

    /// Policy used for source reduction: every open of a child of a watched
    /// directory, nothing for files deleted mid-build.
    pub const REDUCTION: Self =
        Self(Self::OPEN.0 | Self::EXCLUDE_UNLINK.0 | Self::WATCH_ONLY_IF_DIR.0);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::OPEN, "OPEN"),
        (Self::QUEUE_OVERFLOW, "Q_OVERFLOW"),
        (Self::IGNORED, "IGNORED"),
        (Self::WATCH_ONLY_IF_DIR, "ONLYDIR"),
        (Self::EXCLUDE_UNLINK, "EXCL_UNLINK"),
        (Self::IS_DIR, "ISDIR"),
    ];

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                rest &= !flag.0;
                first = false;
            }
        }
        if rest != 0 || first {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}
