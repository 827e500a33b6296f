//! Frame Capture
//!
//! Records every frame seen on one or more ports to a shared text log and
//! replays host-originated frames from such a log at their original timing.

mod format;
mod playback;
mod recorder;

pub use format::{format_line, parse_line, read_log, read_log_from};
pub use playback::{replay_file, ReplayReport, Replayer};
pub use recorder::{capture_port, CaptureConfig, CaptureLog, CaptureLogger, CaptureSummary, PortSummary};

use chrono::Utc;

use crate::protocol::talker_of;

/// One captured frame with its capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Wall-clock capture time, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Frame bytes, start marker through checksum
    pub frame: Vec<u8>,
}

impl CaptureRecord {
    /// Record `frame` with an explicit timestamp
    pub fn new(timestamp_ms: i64, frame: Vec<u8>) -> Self {
        Self {
            timestamp_ms,
            frame,
        }
    }

    /// Stamp a frame with the current time
    pub fn now(frame: Vec<u8>) -> Self {
        Self::new(Utc::now().timestamp_millis(), frame)
    }

    /// Sender address, if the frame is long enough to carry one
    pub fn talker(&self) -> Option<u8> {
        talker_of(&self.frame)
    }
}
