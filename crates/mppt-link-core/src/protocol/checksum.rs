//! Link checksum
//!
//! Reflected CRC-16 used on the controller link:
//! Poly=0x1021, Init=0x496C, RefIn=true, RefOut=true, XorOut=0x0000.
//!
//! The trailer is appended little-endian and covers every byte before it.

const POLY: u16 = 0x1021;
const INIT: u16 = 0x496C;

/// Calculate the link checksum over `data`
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc = INIT;

    for &byte in data {
        crc ^= (byte.reverse_bits() as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }

    crc.reverse_bits()
}

/// Append the checksum of everything currently in `frame` (little-endian)
pub fn append_checksum(frame: &mut Vec<u8>) {
    let crc = checksum(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Split a complete frame into its body and received trailer, and return
/// `(computed, received)`. `None` if the frame cannot hold a trailer.
pub fn trailer(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < 2 {
        return None;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    Some((checksum(body), u16::from_le_bytes([tail[0], tail[1]])))
}
