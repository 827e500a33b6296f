//! Protocol errors

use thiserror::Error;

/// Errors that can occur while framing, decoding or talking to the controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A template or frame is too short to hold a required field
    #[error("Format error: {0}")]
    Format(String),

    /// Trailer does not match the checksum computed over the frame
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Computed over the frame body
        expected: u16,
        /// Read from the trailer
        actual: u16,
    },

    /// Frame is too short for the requested telemetry layout
    #[error("Decode error: frame is {length} bytes, need at least {required}")]
    Decode {
        /// Bytes available
        length: usize,
        /// Bytes the layout needs
        required: usize,
    },

    /// Port open, read or write failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The connect callback could not produce a transport
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation needs an open transport
    #[error("Not connected to controller")]
    NotConnected,

    /// A capture log line could not be parsed
    #[error("Invalid capture log line {line}: {reason}")]
    InvalidLogLine {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Replay was given a log with no records
    #[error("Capture log contains no frames")]
    EmptyLog,

    /// A per-port reader thread panicked; holds the port name
    #[error("{0} worker panicked")]
    WorkerPanicked(String),

    /// Invalid profile or configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or socket error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors that end the owning worker (port open/read/write failures).
    ///
    /// Everything else is a framing-level problem that is recovered locally by
    /// dropping the offending frame.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_)
                | ProtocolError::ConnectionFailed(_)
                | ProtocolError::NotConnected
                | ProtocolError::IoError(_)
        )
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::SerialError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ProtocolError::SerialError("gone".into()).is_transport());
        assert!(ProtocolError::NotConnected.is_transport());
        assert!(!ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_transport());
        assert!(!ProtocolError::Decode {
            length: 12,
            required: 36
        }
        .is_transport());
    }

    #[test]
    fn test_checksum_display_is_hex() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0x9137,
            actual: 0x0001,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0x9137, got 0x0001"
        );
    }
}
