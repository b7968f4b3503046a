//! Byte-exact parser for raw inotify event records.
//!
//! Record layout (native endian, see `inotify(7)`):
//!
//! ```text
//! +----------+----------+----------+----------+-------------------------+
//! | wd: i32  | mask: u32| cookie   | len: u32 | name[len] (NUL padded)  |
//! +----------+----------+----------+----------+-------------------------+
//! ```

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;

use crate::core::errors::{KslError, Result};
use crate::watch::WatchDescriptor;
use crate::watch::mask::EventMask;

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 16;

/// Logical form of one raw event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub descriptor: WatchDescriptor,
    pub mask: EventMask,
    pub cookie: u32,
    /// Name relative to the watched directory; empty for events on the
    /// directory itself.
    pub name: OsString,
}

impl DecodedEvent {
    /// Whether the kernel could not attribute this record to a watch.
    #[must_use]
    pub fn is_loss(&self) -> bool {
        self.descriptor == WatchDescriptor::LOST || self.mask.contains(EventMask::QUEUE_OVERFLOW)
    }
}

/// Parse a buffer holding zero or more whole records.
///
/// The buffer must be consumed exactly; a header or name running past the end
/// means the reader split a record and is reported as corruption.
pub fn decode(bytes: &[u8]) -> Result<Vec<DecodedEvent>> {
    let mut events = Vec::new();
    let mut cursor = 0;

    while cursor < bytes.len() {
        let available = bytes.len() - cursor;
        if available < HEADER_SIZE {
            return Err(KslError::ProtocolCorruption {
                offset: cursor,
                declared: HEADER_SIZE,
                available,
            });
        }

        let header = &bytes[cursor..cursor + HEADER_SIZE];
        let descriptor = i32::from_ne_bytes(field(header, 0));
        let mask = u32::from_ne_bytes(field(header, 4));
        let cookie = u32::from_ne_bytes(field(header, 8));
        let name_len = u32::from_ne_bytes(field(header, 12)) as usize;

        let record_len = HEADER_SIZE.saturating_add(name_len);
        if record_len > available {
            return Err(KslError::ProtocolCorruption {
                offset: cursor,
                declared: record_len,
                available,
            });
        }

        let raw_name = &bytes[cursor + HEADER_SIZE..cursor + record_len];
        let name_end = memchr::memchr(0, raw_name).unwrap_or(raw_name.len());

        events.push(DecodedEvent {
            descriptor: WatchDescriptor::from_raw(descriptor),
            mask: EventMask::from_bits(mask),
            cookie,
            name: OsString::from_vec(raw_name[..name_end].to_vec()),
        });
        cursor += record_len;
    }

    Ok(events)
}

fn field(header: &[u8], at: usize) -> [u8; 4] {
    let mut out = [0_u8; 4];
    out.copy_from_slice(&header[at..at + 4]);
    out
}

/// Serialize one record the way the kernel lays it out, padding the name with
/// NULs up to a multiple of the header alignment.
#[must_use]
pub fn encode_record(descriptor: i32, mask: EventMask, cookie: u32, name: &[u8]) -> Vec<u8> {
    let padded = if name.is_empty() {
        0
    } else {
        (name.len() + 1).next_multiple_of(HEADER_SIZE)
    };
    let mut out = Vec::with_capacity(HEADER_SIZE + padded);
    out.extend_from_slice(&descriptor.to_ne_bytes());
    out.extend_from_slice(&mask.bits().to_ne_bytes());
    out.extend_from_slice(&cookie.to_ne_bytes());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(padded as u32).to_ne_bytes());
    out.extend_from_slice(name);
    out.resize(HEADER_SIZE + padded, 0);
    out
}
