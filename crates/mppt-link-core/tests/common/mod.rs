//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mppt_link_core::protocol::{
    build_telemetry_frame, ProtocolError, TelemetryRecord, Transport, HOST_ADDRESS,
};
use mppt_link_core::session::{SessionState, StatusSink, StopSignal};

/// Produces reply chunks for the n-th write (0-based)
pub type Responder = Box<dyn FnMut(usize, &[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct State {
    written: Vec<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    close_count: usize,
    responder: Option<Responder>,
    fail_after_writes: Option<usize>,
    stop_after_writes: Option<(usize, StopSignal)>,
}

/// Transport whose peer is a closure; clones share state so a test can
/// inspect what the session wrote after handing the transport over
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to writes with whatever `responder` returns
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(usize, &[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
        self
    }

    /// Every write after the first `count` fails
    pub fn fail_after_writes(self, count: usize) -> Self {
        self.state.lock().unwrap().fail_after_writes = Some(count);
        self
    }

    /// Raise `stop` once `count` frames have been written
    pub fn stop_after_writes(self, count: usize, stop: &StopSignal) -> Self {
        self.state.lock().unwrap().stop_after_writes = Some((count, stop.clone()));
        self
    }

    /// Queue bytes to be returned by the next read
    pub fn push_incoming(&self, chunk: &[u8]) {
        self.state.lock().unwrap().pending.push_back(chunk.to_vec());
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        let index = state.written.len();

        if state.fail_after_writes.is_some_and(|limit| index >= limit) {
            return Err(ProtocolError::SerialError("device unplugged".into()));
        }

        state.written.push(data.to_vec());
        if let Some(mut responder) = state.responder.take() {
            let replies = responder(index, data);
            state.pending.extend(replies);
            state.responder = Some(responder);
        }
        if let Some((limit, stop)) = &state.stop_after_writes {
            if state.written.len() >= *limit {
                stop.stop();
            }
        }
        Ok(())
    }

    fn read_available(&mut self, max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        let next = self.state.lock().unwrap().pending.pop_front();
        match next {
            Some(chunk) => Ok(chunk),
            None => {
                std::thread::sleep(max_wait.min(Duration::from_millis(1)));
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) {
        self.state.lock().unwrap().close_count += 1;
    }
}

/// Status sink that records everything it is told
#[derive(Clone, Default)]
pub struct RecordingStatus {
    pub states: Arc<Mutex<Vec<SessionState>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingStatus {
    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn on_state(&mut self, state: SessionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_error(&mut self, error: &ProtocolError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

pub fn sample_telemetry() -> TelemetryRecord {
    TelemetryRecord {
        output_voltage: 52.18,
        output_current: 7.50,
        temperature: 31.5,
        input_voltages: [98.40, 97.10, 0.0],
        input_current: 4.05,
        input_power: 391,
        raw_unknown: [0x1234, 0x0000],
    }
}

/// Telemetry response from a controller at `talker`
pub fn telemetry_frame(talker: u8) -> Vec<u8> {
    build_telemetry_frame(&sample_telemetry(), talker, HOST_ADDRESS, 1)
        .unwrap()
        .into_bytes()
}

/// Route library logs to the test harness (RUST_LOG=debug to see frames)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parse "55 0E 04 ..." into bytes
pub fn hex(text: &str) -> Vec<u8> {
    text.split_whitespace()
        .map(|b| u8::from_str_radix(b, 16).unwrap())
        .collect()
}
