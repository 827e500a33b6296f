//! Multi-port frame recorder
//!
//! One reader thread per port, each with its own synchronizer, all appending
//! to a single log. Frames are not validated, only delimited.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::{format_line, CaptureRecord};
use crate::protocol::{
    format_hex, FrameSynchronizer, ProtocolError, Transport, DEFAULT_BAUD_RATE,
    DEFAULT_READ_WINDOW_MS,
};
use crate::session::StopSignal;

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Ports to listen on
    pub ports: Vec<String>,
    /// Baud rate for every port
    pub baud_rate: u32,
    /// Read window in milliseconds; a stall this long drops a partial frame
    pub read_window_ms: u64,
    /// Log file frames are appended to
    pub log_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ports: vec!["COM7".to_string(), "COM9".to_string()],
            baud_rate: DEFAULT_BAUD_RATE,
            read_window_ms: DEFAULT_READ_WINDOW_MS,
            log_path: PathBuf::from("Data/serial_frames.txt"),
        }
    }
}

/// Append-only capture log shared by all port readers
pub struct CaptureLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CaptureLog {
    /// Open (or create) a log for appending, creating parent directories
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line; concurrent appends never interleave
    pub fn append(&self, record: &CaptureRecord) -> Result<(), ProtocolError> {
        let mut line = format_line(record);
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Outcome for one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    /// Port name as configured
    pub port: String,
    /// Frames written to the log
    pub frames: u64,
    /// Error that ended this port's reader, if any
    pub error: Option<String>,
}

/// Outcome of a capture run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// One entry per configured port, in configuration order
    pub ports: Vec<PortSummary>,
}

impl PortSummary {
    fn new(port: &str, frames: u64, error: Option<String>) -> Self {
        Self {
            port: port.to_string(),
            frames,
            error,
        }
    }
}

impl CaptureSummary {
    /// Frames logged across all ports
    pub fn total_frames(&self) -> u64 {
        self.ports.iter().map(|p| p.frames).sum()
    }
}

/// Read frames from one transport into the log until stopped.
///
/// A transport or log error ends the loop; the summary still counts every
/// frame written before it.
pub fn capture_port<T: Transport + ?Sized>(
    port: &str,
    transport: &mut T,
    log: &CaptureLog,
    window: Duration,
    stop: &StopSignal,
) -> PortSummary {
    let mut frames = 0u64;
    let result = pump(port, transport, log, window, stop, &mut frames);

    match result {
        Ok(()) => {
            tracing::info!(port, frames, "reader stopped");
            PortSummary::new(port, frames, None)
        }
        Err(e) => {
            tracing::error!(port, frames, error = %e, "reader failed");
            PortSummary::new(port, frames, Some(e.to_string()))
        }
    }
}

fn pump<T: Transport + ?Sized>(
    port: &str,
    transport: &mut T,
    log: &CaptureLog,
    window: Duration,
    stop: &StopSignal,
    frames: &mut u64,
) -> Result<(), ProtocolError> {
    let mut sync = FrameSynchronizer::new();

    while !stop.is_stopped() {
        let chunk = transport.read_available(window)?;
        let completed = if chunk.is_empty() {
            sync.expire()
        } else {
            sync.feed(&chunk)
        };

        for frame in completed {
            tracing::debug!(port, frame = %format_hex(&frame), "captured");
            log.append(&CaptureRecord::now(frame))?;
            *frames += 1;
        }
    }

    Ok(())
}

/// Captures every configured port concurrently into one log
pub struct CaptureLogger {
    config: CaptureConfig,
    log: CaptureLog,
}

impl CaptureLogger {
    /// Open the log named in `config`
    pub fn new(config: CaptureConfig) -> Result<Self, ProtocolError> {
        let log = CaptureLog::open(&config.log_path)?;
        Ok(Self { config, log })
    }

    /// Shared log every reader appends to
    pub fn log(&self) -> &CaptureLog {
        &self.log
    }

    /// Run one reader per port until `stop` is raised and every reader has exited.
    ///
    /// A port that fails to open or errors out is reported in the summary and
    /// does not affect the others.
    pub fn run<T, C>(&self, connect: C, stop: &StopSignal) -> CaptureSummary
    where
        T: Transport,
        C: Fn(&str, u32) -> Result<T, ProtocolError> + Sync,
    {
        let window = Duration::from_millis(self.config.read_window_ms);
        let connect = &connect;

        tracing::info!(
            ports = ?self.config.ports,
            log = %self.log.path().display(),
            "capture started"
        );

        let ports = thread::scope(|scope| {
            let workers: Vec<_> = self
                .config
                .ports
                .iter()
                .map(|port| {
                    let handle =
                        scope.spawn(move || self.capture_one(port, connect, window, stop));
                    (port, handle)
                })
                .collect();

            workers
                .into_iter()
                .map(|(port, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        let error = ProtocolError::WorkerPanicked(port.clone()).to_string();
                        PortSummary::new(port, 0, Some(error))
                    })
                })
                .collect()
        });

        let summary = CaptureSummary { ports };
        tracing::info!(frames = summary.total_frames(), "capture finished");
        summary
    }

    fn capture_one<T, C>(
        &self,
        port: &str,
        connect: &C,
        window: Duration,
        stop: &StopSignal,
    ) -> PortSummary
    where
        T: Transport,
        C: Fn(&str, u32) -> Result<T, ProtocolError>,
    {
        let mut transport = match connect(port, self.config.baud_rate) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(port, error = %e, "could not open port, skipping");
                return PortSummary::new(port, 0, Some(e.to_string()));
            }
        };

        tracing::info!(port, "reader started");
        let summary = capture_port(port, &mut transport, &self.log, window, stop);
        transport.close();
        summary
    }
}
