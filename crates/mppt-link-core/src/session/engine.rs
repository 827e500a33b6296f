//! Session engine
//!
//! Drives one controller through
//! `Disconnected -> Connecting -> Handshaking -> Polling -> Stopping -> Closed`.

use std::thread;
use std::time::{Duration, Instant};

use super::{
    DeviceAddress, SequenceCounter, SessionConfig, SessionState, SetpointProvider, StatusSink,
    StopSignal, TelemetrySink,
};
use crate::protocol::{
    build_command_frame, build_handshake_frame, build_poll_frame, decode_telemetry, format_hex,
    is_telemetry, talker_of, DeviceProfile, Frame, FrameSynchronizer, ProtocolError, Transport,
};

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames written to the transport
    pub tx_frames: u64,
    /// Frames recovered from the transport
    pub rx_frames: u64,
    /// Telemetry records delivered to the sink
    pub telemetry: u64,
    /// Telemetry frames that could not be decoded
    pub decode_errors: u64,
    /// Completed poll periods
    pub cycles: u64,
}

/// One controller session.
///
/// Owns the sequence counter and learned address for its lifetime; nothing
/// else mutates them.
pub struct Session {
    config: SessionConfig,
    profile: DeviceProfile,
    state: SessionState,
    sequence: SequenceCounter,
    address: DeviceAddress,
    sync: FrameSynchronizer,
    stats: SessionStats,
}

impl Session {
    /// Create a new session (not yet connected)
    pub fn new(config: SessionConfig, profile: DeviceProfile) -> Self {
        Self {
            sequence: SequenceCounter::new(config.initial_sequence),
            sync: FrameSynchronizer::with_policy(config.checksum_policy),
            config,
            profile,
            state: SessionState::Disconnected,
            address: DeviceAddress::default(),
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device profile frames are built from
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Sequence number the next outbound frame will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence.peek()
    }

    /// Address learned during the handshake, if any
    pub fn device_address(&self) -> DeviceAddress {
        self.address
    }

    /// Counters for the current or last run
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run the session to completion.
    ///
    /// `connect` opens the transport; a failure there ends the session in
    /// `Closed` without retrying. Once open, the transport is closed exactly
    /// once on every exit path. Returns the error that ended the session, if
    /// any; a stop request is a normal exit.
    pub fn run<T, C>(
        &mut self,
        connect: C,
        setpoint: &dyn SetpointProvider,
        telemetry: &mut dyn TelemetrySink,
        status: &mut dyn StatusSink,
        stop: &StopSignal,
    ) -> Result<(), ProtocolError>
    where
        T: Transport,
        C: FnOnce(&SessionConfig) -> Result<T, ProtocolError>,
    {
        if self.state != SessionState::Disconnected {
            return Err(ProtocolError::ConnectionFailed(format!(
                "session already ran (state {})",
                self.state
            )));
        }

        self.profile
            .validate()
            .inspect_err(|e| status.on_error(e))?;

        self.transition(SessionState::Connecting, status);
        let mut transport = match connect(&self.config) {
            Ok(transport) => transport,
            Err(e) => {
                let err = match e {
                    ProtocolError::ConnectionFailed(_) => e,
                    other => ProtocolError::ConnectionFailed(other.to_string()),
                };
                tracing::error!(port = %self.config.port_name, error = %err, "connect failed");
                status.on_error(&err);
                self.transition(SessionState::Closed, status);
                return Err(err);
            }
        };

        let result = self.drive(&mut transport, setpoint, telemetry, status, stop);
        if let Err(e) = &result {
            tracing::error!(port = %self.config.port_name, error = %e, "session aborted");
            status.on_error(e);
        }

        self.transition(SessionState::Stopping, status);
        transport.close();
        self.transition(SessionState::Closed, status);

        tracing::info!(
            tx = self.stats.tx_frames,
            rx = self.stats.rx_frames,
            telemetry = self.stats.telemetry,
            cycles = self.stats.cycles,
            "session closed"
        );

        result
    }

    fn drive<T: Transport>(
        &mut self,
        transport: &mut T,
        setpoint: &dyn SetpointProvider,
        telemetry: &mut dyn TelemetrySink,
        status: &mut dyn StatusSink,
        stop: &StopSignal,
    ) -> Result<(), ProtocolError> {
        self.transition(SessionState::Handshaking, status);
        self.handshake(transport, telemetry)?;

        self.transition(SessionState::Polling, status);
        let interval = Duration::from_millis(self.profile.poll_interval_ms);
        let mut deadline = Instant::now();

        while !stop.is_stopped() {
            self.poll_cycle(transport, setpoint, telemetry)?;
            self.stats.cycles += 1;

            // Sleep until the next period boundary; if we overran, start
            // the next period now instead of bursting to catch up
            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }

        tracing::info!(port = %self.config.port_name, "stop requested");
        Ok(())
    }

    /// Send both session-opening frames; learn the controller address from
    /// the first reply. No reply is not an error.
    fn handshake<T: Transport>(
        &mut self,
        transport: &mut T,
        telemetry: &mut dyn TelemetrySink,
    ) -> Result<(), ProtocolError> {
        let wait = Duration::from_millis(self.config.handshake_wait_ms);
        let templates = self.profile.handshake_templates.clone();

        for template in &templates {
            let frame = build_handshake_frame(self.sequence.next(), self.address.listener(), template)?;
            self.send(transport, &frame)?;

            let replies = self.sync.read_frames(transport, wait)?;
            for talker in replies.iter().filter_map(|r| talker_of(r)) {
                if talker != self.profile.host_address && self.address.learn(talker) {
                    tracing::info!(address = %format!("{:#04x}", talker), "learned controller address");
                }
            }
            self.dispatch(replies, telemetry);
        }

        if !self.address.is_known() {
            tracing::warn!(
                port = %self.config.port_name,
                "no handshake reply, continuing with listener {:#04x}",
                self.address.listener()
            );
        }

        Ok(())
    }

    /// One period: poll, read, command, read
    fn poll_cycle<T: Transport>(
        &mut self,
        transport: &mut T,
        setpoint: &dyn SetpointProvider,
        telemetry: &mut dyn TelemetrySink,
    ) -> Result<(), ProtocolError> {
        let wait = Duration::from_millis(self.config.response_wait_ms);
        let listener = self.address.listener();

        let sequence = self.sequence.next();
        let poll = build_poll_frame(sequence, listener, &self.profile.poll_template)?;
        self.send(transport, &poll)?;
        let replies = self.sync.read_frames(transport, wait)?;
        self.dispatch(replies, telemetry);

        let target = setpoint.current_setpoint();
        let sequence = self.sequence.next();
        let command = build_command_frame(sequence, listener, &target, &self.profile)?;
        self.send(transport, &command)?;
        let replies = self.sync.read_frames(transport, wait)?;
        self.dispatch(replies, telemetry);

        Ok(())
    }

    fn send<T: Transport>(&mut self, transport: &mut T, frame: &Frame) -> Result<(), ProtocolError> {
        tracing::debug!(seq = frame.sequence(), frame = %frame, "tx");
        transport.write(frame.as_bytes())?;
        self.stats.tx_frames += 1;
        Ok(())
    }

    /// Hand telemetry frames to the sink; everything else is only logged
    fn dispatch(&mut self, frames: Vec<Vec<u8>>, telemetry: &mut dyn TelemetrySink) {
        for frame in frames {
            self.stats.rx_frames += 1;
            tracing::debug!(frame = %format_hex(&frame), "rx");

            if !is_telemetry(&frame) {
                continue;
            }
            match decode_telemetry(&frame) {
                Ok(record) => {
                    self.stats.telemetry += 1;
                    telemetry.on_telemetry(&record);
                }
                Err(e) => {
                    self.stats.decode_errors += 1;
                    tracing::warn!(error = %e, "dropping telemetry frame");
                }
            }
        }
    }

    fn transition(&mut self, state: SessionState, status: &mut dyn StatusSink) {
        tracing::info!(port = %self.config.port_name, from = %self.state, to = %state, "session transition");
        self.state = state;
        status.on_state(state);
    }
}
