//! Capture replay
//!
//! Resends the host's frames from a capture log with their original spacing
//! and logs whatever the controller answers.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::{read_log, CaptureRecord};
use crate::protocol::{
    format_hex, talker_of, FrameSynchronizer, ProtocolError, Transport, DEFAULT_READ_WINDOW_MS,
};
use crate::session::StopSignal;

/// Result of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Host frames written to the transport
    pub sent: usize,
    /// Records skipped because another node sent them
    pub skipped: usize,
    /// Frames received in response
    pub responses: usize,
}

/// Replays host-originated frames from a loaded capture
pub struct Replayer {
    records: Vec<CaptureRecord>,
    host_address: u8,
    response_window: Duration,
}

impl Replayer {
    /// Create a replayer. An empty capture is an error.
    pub fn new(records: Vec<CaptureRecord>, host_address: u8) -> Result<Self, ProtocolError> {
        if records.is_empty() {
            return Err(ProtocolError::EmptyLog);
        }

        Ok(Self {
            records,
            host_address,
            response_window: Duration::from_millis(DEFAULT_READ_WINDOW_MS),
        })
    }

    /// Load a capture log from disk
    pub fn from_file<P: AsRef<Path>>(path: P, host_address: u8) -> Result<Self, ProtocolError> {
        Self::new(read_log(path)?, host_address)
    }

    /// How long to collect responses after each sent frame
    pub fn with_response_window(mut self, window: Duration) -> Self {
        self.response_window = window;
        self
    }

    /// Number of records, host or not
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the capture holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Loaded records in log order
    pub fn records(&self) -> &[CaptureRecord] {
        &self.records
    }

    /// Time between the first and last record
    pub fn duration(&self) -> Duration {
        let first = self.records.first().map_or(0, |r| r.timestamp_ms);
        let last = self.records.last().map_or(0, |r| r.timestamp_ms);
        span(first, last)
    }

    /// Replay every record once.
    ///
    /// Each record is scheduled at `start + (timestamp - first timestamp)`;
    /// records stamped before the first one go out immediately. Only frames
    /// whose talker is the host are sent.
    pub fn run<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        stop: &StopSignal,
    ) -> Result<ReplayReport, ProtocolError> {
        let mut sync = FrameSynchronizer::new();
        let mut report = ReplayReport::default();

        let first = self.records[0].timestamp_ms;
        let start = Instant::now();

        for record in &self.records {
            if stop.is_stopped() {
                tracing::info!("replay stopped");
                break;
            }

            if talker_of(&record.frame) != Some(self.host_address) {
                report.skipped += 1;
                continue;
            }

            let offset = span(first, record.timestamp_ms);
            if let Some(due) = start.checked_add(offset) {
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
            }

            tracing::debug!(offset_ms = offset.as_millis() as u64, frame = %format_hex(&record.frame), "replay tx");
            transport.write(&record.frame)?;
            report.sent += 1;

            for response in sync.read_frames(transport, self.response_window)? {
                tracing::info!(frame = %format_hex(&response), "replay rx");
                report.responses += 1;
            }
        }

        tracing::info!(
            sent = report.sent,
            skipped = report.skipped,
            responses = report.responses,
            "replay finished"
        );
        Ok(report)
    }
}

/// Milliseconds from `from` to `to`, clamped to zero when `to` is earlier
fn span(from: i64, to: i64) -> Duration {
    Duration::from_millis(u64::try_from(to.saturating_sub(from)).unwrap_or(0))
}

/// Load `path`, open `port` and replay the capture once.
///
/// The transport is closed whether or not the replay succeeds.
pub fn replay_file<T, C>(
    path: &Path,
    port: &str,
    baud_rate: u32,
    host_address: u8,
    connect: C,
    stop: &StopSignal,
) -> Result<ReplayReport, ProtocolError>
where
    T: Transport,
    C: FnOnce(&str, u32) -> Result<T, ProtocolError>,
{
    let replayer = Replayer::from_file(path, host_address)?;
    tracing::info!(
        path = %path.display(),
        records = replayer.len(),
        duration_ms = replayer.duration().as_millis() as u64,
        "loaded capture"
    );

    let mut transport = connect(port, baud_rate)?;
    let result = replayer.run(&mut transport, stop);
    transport.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HOST_ADDRESS;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        written: Vec<(Instant, Vec<u8>)>,
    }

    impl Transport for Recorder {
        fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
            self.written.push((Instant::now(), data.to_vec()));
            Ok(())
        }

        fn read_available(&mut self, _max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
            Ok(Vec::new())
        }

        fn close(&mut self) {}
    }

    fn record(ts: i64, talker: u8) -> CaptureRecord {
        CaptureRecord::new(ts, vec![0x55, 0x0A, 0x04, 0x66, talker, 0x00, 0x01, 0x00, 0x00, 0x00])
    }

    #[test]
    fn test_empty_capture_rejected() {
        assert!(matches!(
            Replayer::new(Vec::new(), HOST_ADDRESS),
            Err(ProtocolError::EmptyLog)
        ));
    }

    #[test]
    fn test_only_host_frames_sent() {
        let replayer = Replayer::new(
            vec![record(0, HOST_ADDRESS), record(0, 0x11), record(0, HOST_ADDRESS)],
            HOST_ADDRESS,
        )
        .unwrap()
        .with_response_window(Duration::from_millis(1));

        let mut transport = Recorder::default();
        let report = replayer.run(&mut transport, &StopSignal::new()).unwrap();

        assert_eq!(
            report,
            ReplayReport {
                sent: 2,
                skipped: 1,
                responses: 0
            }
        );
        assert!(transport
            .written
            .iter()
            .all(|(_, f)| talker_of(f) == Some(HOST_ADDRESS)));
    }

    #[test]
    fn test_original_spacing_preserved() {
        let replayer = Replayer::new(
            vec![record(1_000, HOST_ADDRESS), record(1_080, HOST_ADDRESS)],
            HOST_ADDRESS,
        )
        .unwrap()
        .with_response_window(Duration::from_millis(1));
        assert_eq!(replayer.duration(), Duration::from_millis(80));

        let mut transport = Recorder::default();
        replayer.run(&mut transport, &StopSignal::new()).unwrap();

        let gap = transport.written[1].0 - transport.written[0].0;
        assert!(gap >= Duration::from_millis(75), "gap was {:?}", gap);
    }

    #[test]
    fn test_earlier_timestamps_sent_immediately() {
        let replayer = Replayer::new(
            vec![record(5_000, HOST_ADDRESS), record(1_000, HOST_ADDRESS)],
            HOST_ADDRESS,
        )
        .unwrap()
        .with_response_window(Duration::from_millis(1));

        let started = Instant::now();
        let report = replayer
            .run(&mut Recorder::default(), &StopSignal::new())
            .unwrap();
        assert_eq!(report.sent, 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_extreme_timestamps() {
        let replayer = Replayer::new(
            vec![record(i64::MIN, HOST_ADDRESS), record(i64::MAX, HOST_ADDRESS)],
            HOST_ADDRESS,
        )
        .unwrap();
        assert_eq!(replayer.duration(), Duration::from_millis(i64::MAX as u64));

        let backwards = Replayer::new(
            vec![record(i64::MAX, HOST_ADDRESS), record(i64::MIN, HOST_ADDRESS)],
            HOST_ADDRESS,
        )
        .unwrap()
        .with_response_window(Duration::from_millis(1));
        assert_eq!(backwards.duration(), Duration::ZERO);

        let started = Instant::now();
        let report = backwards
            .run(&mut Recorder::default(), &StopSignal::new())
            .unwrap();
        assert_eq!(report.sent, 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_before_start_sends_nothing() {
        let replayer = Replayer::new(vec![record(0, HOST_ADDRESS)], HOST_ADDRESS).unwrap();
        let stop = StopSignal::new();
        stop.stop();

        let report = replayer.run(&mut Recorder::default(), &stop).unwrap();
        assert_eq!(report.sent, 0);
    }
}
