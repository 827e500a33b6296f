//! Serial Protocol Communication
//!
//! Implements the controller's binary link: reflected CRC-16 checksum,
//! start-marker/length framing, frame codec and stream synchronization.

pub mod checksum;
pub mod codec;
mod error;
mod frame;
pub mod profile;
pub mod serial;
mod stream;
mod sync;

pub use checksum::{append_checksum, checksum};
pub use codec::{
    build_command_frame, build_handshake_frame, build_poll_frame, build_telemetry_frame,
    decode_telemetry, is_telemetry, Setpoint, TelemetryRecord,
};
pub use error::ProtocolError;
pub use frame::{Frame, FrameBuilder};
pub use profile::DeviceProfile;
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{SerialTransport, TcpTransport, Transport};
pub use sync::{ChecksumPolicy, FrameSynchronizer, SyncState, SyncStats};

/// Default baud rate for the controller link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default poll period in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default read window in milliseconds (how long a read may stall)
pub const DEFAULT_READ_WINDOW_MS: u64 = 600;

/// Start-of-frame marker
pub const START_MARKER: u8 = 0x55;

/// Talker address the host uses
pub const HOST_ADDRESS: u8 = 0xAB;

/// Listener address before the controller's address is learned
pub const UNKNOWN_ADDRESS: u8 = 0x00;

/// Class major shared by every observed frame
pub const CLASS_MAJOR: u8 = 0x04;

/// Class minor of polls and handshakes
pub const CLASS_POLL: u8 = 0x66;

/// Class minor of setpoint commands
pub const CLASS_COMMAND: u8 = 0x38;

/// Class minor of telemetry responses
pub const CLASS_TELEMETRY: u8 = 0x9C;

/// Smallest legal frame: 8 header bytes plus the checksum
pub const MIN_FRAME_LEN: usize = 10;

/// Templates must at least reach the end of the sequence field
pub const MIN_TEMPLATE_LEN: usize = 8;

pub(crate) const OFFSET_CLASS_MAJOR: usize = 2;
pub(crate) const OFFSET_CLASS_MINOR: usize = 3;
pub(crate) const OFFSET_TALKER: usize = 4;
pub(crate) const OFFSET_LISTENER: usize = 5;
pub(crate) const OFFSET_SEQUENCE: usize = 6;

/// Format bytes as space-separated uppercase hex ("55 0E 04")
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Talker byte of raw frame bytes, if the frame is long enough to have one
pub fn talker_of(frame: &[u8]) -> Option<u8> {
    frame.get(OFFSET_TALKER).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x55, 0x0e, 0x04]), "55 0E 04");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_talker_of() {
        assert_eq!(talker_of(&[0x55, 0x0E, 0x04, 0x66, 0xAB]), Some(0xAB));
        assert_eq!(talker_of(&[0x55, 0x0E]), None);
    }
}
