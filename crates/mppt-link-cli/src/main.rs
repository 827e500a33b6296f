//! mppt-link command line
//!
//! Runs a controller session, captures traffic from several ports, replays a
//! capture, lists ports and prints the handshake self-test vector.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mppt_link_core::config::LinkConfig;
use mppt_link_core::datalog::{replay_file, CaptureLogger};
use mppt_link_core::protocol::{
    build_command_frame, build_handshake_frame, checksum, list_ports, ChecksumPolicy,
    DeviceProfile, SerialTransport, Setpoint, TelemetryRecord, UNKNOWN_ADDRESS,
};
use mppt_link_core::session::{
    LoggingStatusSink, LoggingTelemetrySink, SessionConfig, SessionHandle, SharedSetpoint,
    StopSignal, TelemetrySink,
};

#[derive(Parser)]
#[command(name = "mppt-link", version, about = "Serial link to MPPT solar charge controllers")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handshake with a controller and poll it until interrupted
    Session {
        /// Serial port (e.g. /dev/ttyUSB0 or COM7)
        port: Option<String>,

        /// Built-in device profile
        #[arg(long)]
        profile: Option<String>,

        /// Target voltage in volts
        #[arg(long)]
        voltage: Option<f64>,

        /// Target current in amps
        #[arg(long)]
        current: Option<f64>,

        /// Accept inbound frames without checking their checksum
        #[arg(long)]
        permissive: bool,

        /// Print telemetry as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },

    /// Record every frame seen on the given ports to a log
    Capture {
        /// Ports to listen on
        ports: Vec<String>,

        /// Log file to append to
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Resend the host's frames from a capture log
    Replay {
        /// Capture log to replay
        log: PathBuf,

        /// Serial port to replay on
        port: String,

        /// Baud rate
        #[arg(long)]
        baud: Option<u32>,
    },

    /// List available serial ports
    Ports,

    /// Print the checksummed handshake and command frames for a profile
    Vector {
        /// Built-in device profile
        #[arg(long)]
        profile: Option<String>,
    },
}

/// Writes each telemetry record to stdout as one JSON object
struct JsonTelemetrySink;

impl TelemetrySink for JsonTelemetrySink {
    fn on_telemetry(&mut self, record: &TelemetryRecord) {
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "could not serialize telemetry"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => LinkConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LinkConfig::default(),
    };

    match cli.command {
        Command::Session {
            port,
            profile,
            voltage,
            current,
            permissive,
            json,
        } => {
            if let Some(name) = profile {
                config.profile = builtin_profile(&name)?;
            }
            if let Some(port) = port {
                config.session.port_name = port;
            }
            if permissive {
                config.session.checksum_policy = ChecksumPolicy::Permissive;
            }
            let defaults = Setpoint::default();
            let setpoint = Setpoint::new(
                voltage.unwrap_or(defaults.voltage),
                current.unwrap_or(defaults.current),
            );
            run_session(config, setpoint, json).await
        }
        Command::Capture { ports, log } => {
            if !ports.is_empty() {
                config.capture.ports = ports;
            }
            if let Some(log) = log {
                config.capture.log_path = log;
            }
            run_capture(config).await
        }
        Command::Replay { log, port, baud } => {
            let baud = baud.unwrap_or(config.session.baud_rate);
            let host = config.profile.host_address;
            let stop = StopSignal::new();
            stop_on_ctrl_c(stop.clone());

            let report = tokio::task::spawn_blocking(move || {
                replay_file(&log, &port, baud, host, SerialTransport::open, &stop)
            })
            .await??;
            println!(
                "sent {} frames, skipped {}, received {} responses",
                report.sent, report.skipped, report.responses
            );
            Ok(())
        }
        Command::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                let usb = match (port.vid, port.pid) {
                    (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
                    _ => "-".to_string(),
                };
                println!(
                    "{:<20} {:<10} {}",
                    port.name,
                    usb,
                    port.product.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Vector { profile } => {
            if let Some(name) = profile {
                config.profile = builtin_profile(&name)?;
            }
            print_vectors(&config.profile)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn builtin_profile(name: &str) -> Result<DeviceProfile> {
    match DeviceProfile::builtin(name) {
        Some(profile) => Ok(profile),
        None => bail!(
            "unknown profile '{}' (available: {})",
            name,
            DeviceProfile::builtin_names().join(", ")
        ),
    }
}

/// Raise `stop` on the first Ctrl-C
fn stop_on_ctrl_c(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stop.stop();
        }
    });
}

async fn run_session(config: LinkConfig, setpoint: Setpoint, json: bool) -> Result<()> {
    if config.session.port_name.is_empty() {
        bail!("no serial port given (pass one or set session.port_name in the config)");
    }

    let telemetry: Box<dyn TelemetrySink> = if json {
        Box::new(JsonTelemetrySink)
    } else {
        Box::new(LoggingTelemetrySink)
    };

    tracing::info!(
        port = %config.session.port_name,
        profile = %config.profile.name,
        voltage = setpoint.voltage,
        current = setpoint.current,
        "starting session"
    );

    let handle = SessionHandle::start(
        config.session,
        config.profile,
        |c: &SessionConfig| SerialTransport::open(&c.port_name, c.baud_rate),
        Arc::new(SharedSetpoint::new(setpoint)),
        telemetry,
        Box::new(LoggingStatusSink),
    )?;
    stop_on_ctrl_c(handle.stop_signal());

    let stats = tokio::task::spawn_blocking(move || handle.wait()).await??;
    println!(
        "sent {} frames, received {}, {} telemetry records over {} cycles",
        stats.tx_frames, stats.rx_frames, stats.telemetry, stats.cycles
    );
    Ok(())
}

async fn run_capture(config: LinkConfig) -> Result<()> {
    if config.capture.ports.is_empty() {
        bail!("no ports to capture from");
    }

    let logger = CaptureLogger::new(config.capture)?;
    let stop = StopSignal::new();
    stop_on_ctrl_c(stop.clone());

    let summary =
        tokio::task::spawn_blocking(move || logger.run(SerialTransport::open, &stop)).await?;

    for port in &summary.ports {
        match &port.error {
            Some(error) => println!("{}: {} frames, failed: {}", port.port, port.frames, error),
            None => println!("{}: {} frames", port.port, port.frames),
        }
    }

    if summary.ports.iter().all(|p| p.error.is_some()) {
        bail!("every capture port failed");
    }
    Ok(())
}

fn print_vectors(profile: &DeviceProfile) -> Result<()> {
    profile.validate()?;

    let handshake = build_handshake_frame(1, UNKNOWN_ADDRESS, &profile.handshake_templates[0])?;
    println!("handshake  {}", handshake);
    println!(
        "checksum   {:#06x}",
        checksum(&handshake.as_bytes()[..handshake.len() - 2])
    );

    let command = build_command_frame(4, UNKNOWN_ADDRESS, &Setpoint::default(), profile)?;
    println!("command    {}", command);
    Ok(())
}
