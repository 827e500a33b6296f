//! Frame codec
//!
//! Builds the host's outbound frames (handshake, poll, command) and decodes
//! telemetry responses into scaled values.
//!
//! Fixed-point conventions: voltages and currents are ×0.01, temperature is
//! ×0.1, input power is whole watts.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::checksum::append_checksum;
use super::{
    DeviceProfile, Frame, FrameBuilder, ProtocolError, CLASS_COMMAND, CLASS_MAJOR,
    CLASS_TELEMETRY, MIN_TEMPLATE_LEN, OFFSET_CLASS_MINOR, OFFSET_LISTENER, OFFSET_SEQUENCE,
};

/// Minimum size of a telemetry response frame
pub const TELEMETRY_FRAME_LEN: usize = 36;

const OUTPUT_VOLTAGE: usize = 12;
const OUTPUT_CURRENT: usize = 14;
const TEMPERATURE: usize = 16;
const INPUT_VOLTAGES: [usize; 3] = [18, 20, 22];
const INPUT_CURRENT: usize = 24;
const INPUT_POWER: usize = 26;
const RAW_FIELDS: [usize; 2] = [28, 30];

/// Target output the controller should regulate toward
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    /// Target voltage in volts
    pub voltage: f64,
    /// Target current in amps
    pub current: f64,
}

impl Setpoint {
    /// Setpoint in volts and amps
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    /// Wire encoding: `(round(volts * 100), round(amps * 100))`
    pub fn encode(&self) -> (u16, u16) {
        (to_fixed(self.voltage, 100.0), to_fixed(self.current, 100.0))
    }
}

impl Default for Setpoint {
    fn default() -> Self {
        Self {
            voltage: 52.20,
            current: 7.65,
        }
    }
}

/// Decoded telemetry response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Output voltage (V)
    pub output_voltage: f64,
    /// Output current (A)
    pub output_current: f64,
    /// Temperature (°C)
    pub temperature: f64,
    /// Input-stage voltages (V)
    pub input_voltages: [f64; 3],
    /// Input current (A)
    pub input_current: f64,
    /// Input power (W)
    pub input_power: u16,
    /// Two fields whose meaning is not yet known, as received
    pub raw_unknown: [u16; 2],
}

/// Scale and round to the u16 wire range; negative and NaN become 0
fn to_fixed(value: f64, scale: f64) -> u16 {
    let scaled = (value * scale).round();
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= u16::MAX as f64 {
        u16::MAX
    } else {
        scaled as u16
    }
}

/// Rewrite sequence (and listener, once known) in a fixed template and seal it
fn rewrite_template(sequence: u16, listener: u8, template: &[u8]) -> Result<Frame, ProtocolError> {
    if template.len() < MIN_TEMPLATE_LEN {
        return Err(ProtocolError::Format(format!(
            "template is {} bytes, need at least {} for the sequence field",
            template.len(),
            MIN_TEMPLATE_LEN
        )));
    }

    let mut bytes = template.to_vec();
    LittleEndian::write_u16(&mut bytes[OFFSET_SEQUENCE..OFFSET_SEQUENCE + 2], sequence);
    if listener != 0 {
        bytes[OFFSET_LISTENER] = listener;
    }
    append_checksum(&mut bytes);

    Frame::from_bytes(&bytes)
}

/// Build one of the session-opening frames from its template
pub fn build_handshake_frame(
    sequence: u16,
    listener: u8,
    template: &[u8],
) -> Result<Frame, ProtocolError> {
    rewrite_template(sequence, listener, template)
}

/// Build the periodic telemetry poll from its template
pub fn build_poll_frame(sequence: u16, listener: u8, template: &[u8]) -> Result<Frame, ProtocolError> {
    rewrite_template(sequence, listener, template)
}

/// Build a command frame carrying the setpoint
pub fn build_command_frame(
    sequence: u16,
    listener: u8,
    setpoint: &Setpoint,
    profile: &DeviceProfile,
) -> Result<Frame, ProtocolError> {
    let (voltage, current) = setpoint.encode();

    FrameBuilder::new(CLASS_MAJOR, CLASS_COMMAND)
        .talker(profile.host_address)
        .listener(listener)
        .sequence(sequence)
        .bytes(&profile.command_prefix)
        .u16_le(voltage)
        .u16_le(current)
        .bytes(&profile.command_trailer)
        .byte(profile.enable_flag)
        .build()
}

/// True if the frame carries a telemetry response
pub fn is_telemetry(frame: &[u8]) -> bool {
    frame.len() > OFFSET_CLASS_MINOR && frame[OFFSET_CLASS_MINOR] == CLASS_TELEMETRY
}

/// Decode a telemetry response. The checksum is not checked here.
pub fn decode_telemetry(frame: &[u8]) -> Result<TelemetryRecord, ProtocolError> {
    if frame.len() < TELEMETRY_FRAME_LEN {
        return Err(ProtocolError::Decode {
            length: frame.len(),
            required: TELEMETRY_FRAME_LEN,
        });
    }

    if !is_telemetry(frame) {
        return Err(ProtocolError::Format(format!(
            "class {:#04x} is not a telemetry response",
            frame[OFFSET_CLASS_MINOR]
        )));
    }

    let word = |offset: usize| LittleEndian::read_u16(&frame[offset..offset + 2]);
    let centi = |offset: usize| word(offset) as f64 * 0.01;

    Ok(TelemetryRecord {
        output_voltage: centi(OUTPUT_VOLTAGE),
        output_current: centi(OUTPUT_CURRENT),
        temperature: word(TEMPERATURE) as f64 * 0.1,
        input_voltages: INPUT_VOLTAGES.map(centi),
        input_current: centi(INPUT_CURRENT),
        input_power: word(INPUT_POWER),
        raw_unknown: RAW_FIELDS.map(word),
    })
}

/// Build a telemetry response as the controller would send it.
///
/// Used by simulators and tests to drive the host side.
pub fn build_telemetry_frame(
    record: &TelemetryRecord,
    talker: u8,
    listener: u8,
    sequence: u16,
) -> Result<Frame, ProtocolError> {
    let mut builder = FrameBuilder::new(CLASS_MAJOR, CLASS_TELEMETRY)
        .talker(talker)
        .listener(listener)
        .sequence(sequence)
        .bytes(&[0x00; 4])
        .u16_le(to_fixed(record.output_voltage, 100.0))
        .u16_le(to_fixed(record.output_current, 100.0))
        .u16_le(to_fixed(record.temperature, 10.0));
    for v in record.input_voltages {
        builder = builder.u16_le(to_fixed(v, 100.0));
    }
    builder
        .u16_le(to_fixed(record.input_current, 100.0))
        .u16_le(record.input_power)
        .u16_le(record.raw_unknown[0])
        .u16_le(record.raw_unknown[1])
        .bytes(&[0x00; 2])
        .build()
}
