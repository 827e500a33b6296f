//! Frame encoding/decoding
//!
//! Frame layout (all multi-byte fields little-endian):
//! - 1 byte: start marker (0x55)
//! - 1 byte: total length, counting every byte including itself and the checksum
//! - 2 bytes: class major / class minor
//! - 1 byte: talker address
//! - 1 byte: listener address
//! - 2 bytes: sequence number
//! - N bytes: payload (N = length - 10)
//! - 2 bytes: checksum of everything before it

use byteorder::{ByteOrder, LittleEndian};

use super::checksum::{append_checksum, trailer};
use super::{
    format_hex, ProtocolError, MIN_FRAME_LEN, OFFSET_CLASS_MAJOR, OFFSET_CLASS_MINOR,
    OFFSET_LISTENER, OFFSET_SEQUENCE, OFFSET_TALKER, START_MARKER,
};

/// A complete link frame, start marker through checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wrap raw frame bytes after structural validation.
    ///
    /// Frames shorter than the 10-byte minimum are rejected before the
    /// checksum is looked at. The checksum itself is not verified here.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::Format(format!(
                "frame is {} bytes, minimum is {}",
                data.len(),
                MIN_FRAME_LEN
            )));
        }

        if data[0] != START_MARKER {
            return Err(ProtocolError::Format(format!(
                "bad start marker {:#04x}",
                data[0]
            )));
        }

        if data[1] as usize != data.len() {
            return Err(ProtocolError::Format(format!(
                "length byte says {} but frame is {} bytes",
                data[1],
                data.len()
            )));
        }

        Ok(Self {
            bytes: data.to_vec(),
        })
    }

    /// Wrap raw bytes and also verify the checksum trailer
    pub fn from_bytes_checked(data: &[u8]) -> Result<Self, ProtocolError> {
        let frame = Self::from_bytes(data)?;
        frame.verify_checksum()?;
        Ok(frame)
    }

    /// Check the trailing checksum against the frame contents
    pub fn verify_checksum(&self) -> Result<(), ProtocolError> {
        match trailer(&self.bytes) {
            Some((expected, actual)) if expected == actual => Ok(()),
            Some((expected, actual)) => Err(ProtocolError::ChecksumMismatch { expected, actual }),
            None => Err(ProtocolError::Format("frame has no checksum".into())),
        }
    }

    /// Total length in bytes, checksum included
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true for a parsed frame
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte 2
    pub fn class_major(&self) -> u8 {
        self.bytes[OFFSET_CLASS_MAJOR]
    }

    /// Byte 3; tells handshake/poll, command and telemetry apart
    pub fn class_minor(&self) -> u8 {
        self.bytes[OFFSET_CLASS_MINOR]
    }

    /// Address of the sender
    pub fn talker(&self) -> u8 {
        self.bytes[OFFSET_TALKER]
    }

    /// Address of the intended recipient
    pub fn listener(&self) -> u8 {
        self.bytes[OFFSET_LISTENER]
    }

    /// Little-endian sequence number at bytes 6-7
    pub fn sequence(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[OFFSET_SEQUENCE..OFFSET_SEQUENCE + 2])
    }

    /// Type-specific payload between the header and the checksum
    pub fn payload(&self) -> &[u8] {
        &self.bytes[OFFSET_SEQUENCE + 2..self.bytes.len() - 2]
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the raw frame bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_hex(&self.bytes))
    }
}

/// Builder for frames with a computed length byte and checksum
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    /// Start a frame of the given class
    pub fn new(class_major: u8, class_minor: u8) -> Self {
        Self {
            bytes: vec![START_MARKER, 0, class_major, class_minor, 0, 0, 0, 0],
        }
    }

    /// Sender address, byte 4
    pub fn talker(mut self, address: u8) -> Self {
        self.bytes[OFFSET_TALKER] = address;
        self
    }

    /// Receiver address, byte 5
    pub fn listener(mut self, address: u8) -> Self {
        self.bytes[OFFSET_LISTENER] = address;
        self
    }

    /// Sequence number, bytes 6-7
    pub fn sequence(mut self, sequence: u16) -> Self {
        LittleEndian::write_u16(&mut self.bytes[OFFSET_SEQUENCE..OFFSET_SEQUENCE + 2], sequence);
        self
    }

    /// Add a single payload byte
    pub fn byte(mut self, b: u8) -> Self {
        self.bytes.push(b);
        self
    }

    /// Add a 16-bit payload value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Add raw payload bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// Fill in the length byte, append the checksum and build the frame
    pub fn build(mut self) -> Result<Frame, ProtocolError> {
        let total = self.bytes.len() + 2;
        if total > u8::MAX as usize {
            return Err(ProtocolError::Format(format!(
                "frame of {} bytes does not fit the length byte",
                total
            )));
        }
        self.bytes[1] = total as u8;
        append_checksum(&mut self.bytes);
        Ok(Frame { bytes: self.bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Frame {
        FrameBuilder::new(0x04, 0x66)
            .talker(0xAB)
            .listener(0x00)
            .sequence(1)
            .bytes(&[0x40, 0x00, 0x01, 0x01])
            .build()
            .expect("should build")
    }

    #[test]
    fn test_builder_matches_handshake_vector() {
        assert_eq!(
            sample().as_bytes(),
            &[0x55, 0x0E, 0x04, 0x66, 0xAB, 0x00, 0x01, 0x00, 0x40, 0x00, 0x01, 0x01, 0x37, 0x91]
        );
    }

    #[test]
    fn test_header_accessors() {
        let frame = sample();
        assert_eq!(frame.len(), 14);
        assert_eq!(frame.class_major(), 0x04);
        assert_eq!(frame.class_minor(), 0x66);
        assert_eq!(frame.talker(), 0xAB);
        assert_eq!(frame.listener(), 0x00);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.payload(), &[0x40, 0x00, 0x01, 0x01]);
        assert!(frame.verify_checksum().is_ok());
    }

    #[test]
    fn test_short_frame_rejected_before_checksum() {
        let err = Frame::from_bytes_checked(&[0x55, 0x05, 0x04, 0x66, 0xAB]).unwrap_err();
        assert!(matches!(err, ProtocolError::Format(_)));
    }

    #[test]
    fn test_length_byte_must_match() {
        let mut bytes = sample().into_bytes();
        bytes.push(0x00);
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_checksum_verification() {
        let mut bytes = sample().into_bytes();
        bytes[9] ^= 0xFF;
        let frame = Frame::from_bytes(&bytes).expect("structure is still valid");
        assert!(matches!(
            frame.verify_checksum(),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(
            sample().to_string(),
            "55 0E 04 66 AB 00 01 00 40 00 01 01 37 91"
        );
    }
}
