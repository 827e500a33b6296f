//! Controller Sessions
//!
//! A session opens a transport, performs the two-frame handshake, then polls
//! the controller on a fixed period, pushing the current setpoint every cycle.

mod engine;
mod handle;

pub use engine::{Session, SessionStats};
pub use handle::SessionHandle;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::protocol::{
    ChecksumPolicy, ProtocolError, Setpoint, TelemetryRecord, DEFAULT_BAUD_RATE,
    DEFAULT_READ_WINDOW_MS, UNKNOWN_ADDRESS,
};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not started
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Sending the session-opening frames
    Handshaking,
    /// Periodic poll/command cycle
    Polling,
    /// Finishing the current period after a stop request or error
    Stopping,
    /// Transport released; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Polling => "polling",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// How long to wait for a reply to each handshake frame
    pub handshake_wait_ms: u64,
    /// How long to wait for replies after each poll or command
    pub response_wait_ms: u64,
    /// Checksum handling for inbound frames
    pub checksum_policy: ChecksumPolicy,
    /// First sequence number used
    pub initial_sequence: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            handshake_wait_ms: DEFAULT_READ_WINDOW_MS,
            response_wait_ms: 100,
            checksum_policy: ChecksumPolicy::default(),
            initial_sequence: 1,
        }
    }
}

/// Host sequence counter: one increment per frame sent, wrapping at 65536
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u16,
}

impl SequenceCounter {
    /// Counter whose first value is `initial`
    pub fn new(initial: u16) -> Self {
        Self { next: initial }
    }

    /// Take the number for the frame about to be sent
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u16 {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }

    /// Number the next frame will get
    pub fn peek(&self) -> u16 {
        self.next
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Controller address, learned once from the first handshake reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceAddress {
    learned: Option<u8>,
}

impl DeviceAddress {
    /// Listener byte for outgoing frames (0x00 until learned)
    pub fn listener(&self) -> u8 {
        self.learned.unwrap_or(UNKNOWN_ADDRESS)
    }

    /// False until a handshake reply names the device
    pub fn is_known(&self) -> bool {
        self.learned.is_some()
    }

    /// Record the address. Returns false if one was already learned.
    pub fn learn(&mut self, talker: u8) -> bool {
        if self.learned.is_some() {
            return false;
        }
        self.learned = Some(talker);
        true
    }
}

/// Source of the setpoint sent in each command frame
pub trait SetpointProvider: Send + Sync {
    /// Setpoint for the command frame about to be built
    fn current_setpoint(&self) -> Setpoint;
}

/// Setpoint shared between the session thread and whoever edits it
#[derive(Debug, Clone, Default)]
pub struct SharedSetpoint {
    inner: Arc<RwLock<Setpoint>>,
}

impl SharedSetpoint {
    /// Share an initial setpoint
    pub fn new(setpoint: Setpoint) -> Self {
        Self {
            inner: Arc::new(RwLock::new(setpoint)),
        }
    }

    /// Replace the setpoint; the next command frame picks it up
    pub fn set(&self, setpoint: Setpoint) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = setpoint;
        tracing::info!(
            voltage = setpoint.voltage,
            current = setpoint.current,
            "setpoint updated"
        );
    }
}

impl SetpointProvider for SharedSetpoint {
    fn current_setpoint(&self) -> Setpoint {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Consumer of decoded telemetry
pub trait TelemetrySink: Send {
    /// Called once per decoded telemetry frame
    fn on_telemetry(&mut self, record: &TelemetryRecord);
}

impl<F> TelemetrySink for F
where
    F: FnMut(&TelemetryRecord) + Send,
{
    fn on_telemetry(&mut self, record: &TelemetryRecord) {
        self(record)
    }
}

/// Consumer of session state changes and terminal errors
pub trait StatusSink: Send {
    /// Called on every state transition
    fn on_state(&mut self, state: SessionState);
    /// Called once with the error that ended the session
    fn on_error(&mut self, error: &ProtocolError);
}

/// Reports telemetry through `tracing`
#[derive(Debug, Default)]
pub struct LoggingTelemetrySink;

impl TelemetrySink for LoggingTelemetrySink {
    fn on_telemetry(&mut self, r: &TelemetryRecord) {
        tracing::info!(
            "telemetry: out {:.2} V {:.2} A, {:.1} C, in {:.2}/{:.2}/{:.2} V {:.2} A {} W",
            r.output_voltage,
            r.output_current,
            r.temperature,
            r.input_voltages[0],
            r.input_voltages[1],
            r.input_voltages[2],
            r.input_current,
            r.input_power
        );
    }
}

/// Reports session status through `tracing`
#[derive(Debug, Default)]
pub struct LoggingStatusSink;

impl StatusSink for LoggingStatusSink {
    fn on_state(&mut self, state: SessionState) {
        tracing::info!(%state, "session state");
    }

    fn on_error(&mut self, error: &ProtocolError) {
        tracing::error!(%error, "session failed");
    }
}

/// Shared cancellation flag, polled once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Signal in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to wind down
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_at_one_and_wraps() {
        let mut seq = SequenceCounter::default();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);

        let mut seq = SequenceCounter::new(u16::MAX);
        assert_eq!(seq.next(), u16::MAX);
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.peek(), 1);
    }

    #[test]
    fn test_address_learned_once() {
        let mut addr = DeviceAddress::default();
        assert_eq!(addr.listener(), 0x00);
        assert!(!addr.is_known());

        assert!(addr.learn(0x11));
        assert!(!addr.learn(0x22));
        assert_eq!(addr.listener(), 0x11);
    }

    #[test]
    fn test_shared_setpoint_visible_across_clones() {
        let shared = SharedSetpoint::new(Setpoint::new(48.0, 5.0));
        let reader = shared.clone();
        shared.set(Setpoint::new(54.6, 10.0));
        assert_eq!(reader.current_setpoint(), Setpoint::new(54.6, 10.0));
    }

    #[test]
    fn test_stop_signal_shared() {
        let stop = StopSignal::new();
        let other = stop.clone();
        assert!(!other.is_stopped());
        stop.stop();
        assert!(other.is_stopped());
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.initial_sequence, 1);
        assert_eq!(config.baud_rate, 115200);
    }
}
