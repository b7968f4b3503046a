//! Event capture: readiness polling, exact-size drains, and the append-only
//! raw buffer they feed.
//!
//! Capture never parses. Chunks are stored as read and decoded only after the
//! build has exited cleanly, so a malformed chunk can never stall the polling
//! loop that keeps the kernel queue from overflowing.

#![allow(missing_docs)]

use std::time::Duration;

use crate::core::errors::{KslError, Result};
use crate::watch::backend::WatchBackend;
use crate::watch::decoder::{self, DecodedEvent};
use crate::watch::session::WatchSession;

/// Ordered raw chunks captured from the kernel.
#[derive(Debug, Default, Clone)]
pub struct EventBuffer {
    chunks: Vec<Vec<u8>>,
}

impl EventBuffer {
    /// Append one chunk; empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Decode every chunk in capture order.
    ///
    /// Fails on the first corrupt chunk, and on any record the kernel could
    /// not attribute to a watch: once events have been dropped the touched
    /// set is incomplete and deleting from it would remove needed sources.
    pub fn decode_all(&self) -> Result<Vec<DecodedEvent>> {
        let mut events = Vec::new();
        for chunk in &self.chunks {
            events.extend(decoder::decode(chunk)?);
        }

        let lost = events.iter().filter(|e| e.is_loss()).count();
        if lost > 0 {
            let mut details = format!("{lost} record(s) reported without a watch descriptor");
            if let Some(limit) = queue_limit() {
                details.push_str(&format!("; kernel queue limit is {limit} events"));
            }
            return Err(KslError::EventsLost { details });
        }
        Ok(events)
    }
}

#[cfg(target_os = "linux")]
fn queue_limit() -> Option<u64> {
    crate::platform::inotify::max_queued_events()
}

#[cfg(not(target_os = "linux"))]
fn queue_limit() -> Option<u64> {
    None
}

impl<B: WatchBackend> WatchSession<B> {
    /// Wait for pending events. `Some(Duration::ZERO)` only checks, `None`
    /// waits without limit.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.backend.wait_readable(timeout)
    }

    /// Read everything currently queued in a single read sized by the
    /// kernel's own byte count, so no record is ever split.
    pub fn drain(&mut self) -> Result<Vec<u8>> {
        let pending = self.backend.available_bytes()?;
        if pending == 0 {
            return Ok(Vec::new());
        }
        self.backend.read_exact(pending)
    }

    /// Drain; if nothing was queued and waiting is allowed, wait for
    /// readiness, give closely spaced events `grace` to accumulate, then
    /// drain again.
    pub fn read_with_grace(
        &mut self,
        timeout: Option<Duration>,
        grace: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let bytes = self.drain()?;
        if !bytes.is_empty() || timeout == Some(Duration::ZERO) {
            return Ok(bytes);
        }
        if !self.poll(timeout)? {
            return Ok(bytes);
        }
        if let Some(delay) = grace.filter(|d| !d.is_zero()) {
            std::thread::sleep(delay);
        }
        self.drain()
    }

    /// [`read_with_grace`](Self::read_with_grace) into the session buffer.
    /// Returns the number of bytes captured.
    pub fn capture(&mut self, timeout: Option<Duration>, grace: Option<Duration>) -> Result<usize> {
        let chunk = self.read_with_grace(timeout, grace)?;
        let captured = chunk.len();
        self.buffer.push(chunk);
        Ok(captured)
    }

    /// Unconditional final drain into the session buffer.
    pub fn capture_remaining(&mut self) -> Result<usize> {
        let chunk = self.drain()?;
        let captured = chunk.len();
        self.buffer.push(chunk);
        Ok(captured)
    }
}
