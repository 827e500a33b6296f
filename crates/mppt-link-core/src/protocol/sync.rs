//! Stream synchronizer
//!
//! Recovers length-delimited frames from an unbounded byte stream. Only the
//! start marker and the length byte are interpreted.
//!
//! ```text
//! SeekStart --0x55--> ReadLength --L--> Accumulate(L) --L bytes--> emit, SeekStart
//! ```
//!
//! A stall while a frame is in progress discards the partial frame. When a
//! validator is installed, a completed frame that fails validation is dropped
//! and every byte after its start marker is scanned again, so a good frame
//! hidden inside a mis-framed region is still found.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{format_hex, Frame, ProtocolError, Transport, MIN_FRAME_LEN, START_MARKER};

/// What to do with the checksum of inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Drop frames whose trailer does not match and resynchronize
    #[default]
    Enforce,
    /// Accept any structurally complete frame
    Permissive,
}

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Scanning for the start marker
    SeekStart,
    /// Start marker seen, next byte is the total length
    ReadLength,
    /// Collecting the rest of a frame of `expected` bytes
    Accumulate {
        /// Value of the length byte
        expected: usize,
    },
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames delivered
    pub frames: u64,
    /// Completed frames rejected by validation or a bad length byte
    pub rejected: u64,
    /// Partial frames discarded after a stall
    pub expired: u64,
}

/// Byte-at-a-time frame synchronizer
#[derive(Debug, Clone)]
pub struct FrameSynchronizer {
    state: SyncState,
    buffer: Vec<u8>,
    policy: Option<ChecksumPolicy>,
    stats: SyncStats,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer {
    /// Synchronizer that delivers every complete frame without looking inside
    pub fn new() -> Self {
        Self {
            state: SyncState::SeekStart,
            buffer: Vec::with_capacity(u8::MAX as usize),
            policy: None,
            stats: SyncStats::default(),
        }
    }

    /// Synchronizer that validates completed frames under `policy`
    pub fn with_policy(policy: ChecksumPolicy) -> Self {
        Self {
            policy: Some(policy),
            ..Self::new()
        }
    }

    /// Current parser state
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// True when no frame is in progress
    pub fn is_idle(&self) -> bool {
        self.state == SyncState::SeekStart
    }

    /// Counters since construction
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Feed a chunk of bytes and collect any frames it completes
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut queue = VecDeque::new();

        for &byte in data {
            queue.push_back(byte);
            while let Some(b) = queue.pop_front() {
                if let Some(rejected) = self.step(b, &mut frames) {
                    // Rescan everything after the rejected start marker first
                    for &r in rejected[1..].iter().rev() {
                        queue.push_front(r);
                    }
                }
            }
        }

        frames
    }

    /// The stream went quiet: drop the partial frame and rescan what it had
    /// swallowed after its start marker.
    ///
    /// A stray marker or a corrupt length byte can hold a complete frame
    /// inside the partial one; those frames are returned.
    pub fn expire(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        while !self.is_idle() {
            let partial = std::mem::take(&mut self.buffer);
            tracing::warn!(
                partial = partial.len(),
                "read window elapsed mid-frame, discarding partial frame"
            );
            self.stats.expired += 1;
            self.state = SyncState::SeekStart;
            frames.extend(self.feed(&partial[1..]));
        }

        frames
    }

    /// Advance by one byte. Returns the bytes of a rejected frame, if any.
    fn step(&mut self, byte: u8, frames: &mut Vec<Vec<u8>>) -> Option<Vec<u8>> {
        match self.state {
            SyncState::SeekStart => {
                if byte == START_MARKER {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = SyncState::ReadLength;
                }
                None
            }
            SyncState::ReadLength => {
                self.buffer.push(byte);
                let expected = byte as usize;
                if expected < MIN_FRAME_LEN {
                    tracing::debug!(length = expected, "implausible length byte, resyncing");
                    self.stats.rejected += 1;
                    self.state = SyncState::SeekStart;
                    return Some(std::mem::take(&mut self.buffer));
                }
                self.state = SyncState::Accumulate { expected };
                None
            }
            SyncState::Accumulate { expected } => {
                self.buffer.push(byte);
                if self.buffer.len() < expected {
                    return None;
                }

                self.state = SyncState::SeekStart;
                let frame = std::mem::take(&mut self.buffer);
                match self.validate(&frame) {
                    Ok(()) => {
                        self.stats.frames += 1;
                        frames.push(frame);
                        None
                    }
                    Err(e) => {
                        tracing::warn!(frame = %format_hex(&frame), error = %e, "dropping frame");
                        self.stats.rejected += 1;
                        Some(frame)
                    }
                }
            }
        }
    }

    fn validate(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        match self.policy {
            None => Ok(()),
            Some(policy) => {
                let frame = Frame::from_bytes(frame)?;
                if policy == ChecksumPolicy::Enforce {
                    frame.verify_checksum()?;
                }
                Ok(())
            }
        }
    }

    /// Read from `transport` for up to `window` and return the frames recovered.
    ///
    /// Returns early once at least one frame has been delivered and no other
    /// frame is in progress. A read that yields nothing ends the call and
    /// expires any partial frame.
    pub fn read_frames<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        window: Duration,
    ) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let chunk = transport.read_available(remaining)?;
            if chunk.is_empty() {
                frames.extend(self.expire());
                break;
            }

            frames.extend(self.feed(&chunk));
            if !frames.is_empty() && self.is_idle() {
                break;
            }
        }

        Ok(frames)
    }
}
