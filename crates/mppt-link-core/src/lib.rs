//! # mppt-link Core Library
//!
//! Host side of the serial link to a solar MPPT charge controller.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame checksum, codec and stream synchronization for the controller's
//!   binary protocol
//! - A polling session that handshakes, pushes setpoints and decodes telemetry
//! - Multi-port frame capture to a text log, and timed replay of such logs
//!
//! ## Example
//!
//! ```rust,ignore
//! use mppt_link_core::prelude::*;
//!
//! let config = SessionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..SessionConfig::default()
//! };
//! let handle = SessionHandle::start(
//!     config,
//!     DeviceProfile::default(),
//!     |c: &SessionConfig| SerialTransport::open(&c.port_name, c.baud_rate),
//!     Arc::new(SharedSetpoint::new(Setpoint::new(52.2, 7.65))),
//!     Box::new(LoggingTelemetrySink),
//!     Box::new(LoggingStatusSink),
//! )?;
//! // ...
//! handle.stop()?;
//! ```

pub mod config;
pub mod datalog;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::datalog::{CaptureConfig, CaptureLogger, CaptureRecord, Replayer};
    pub use crate::protocol::{
        ChecksumPolicy, DeviceProfile, Frame, FrameSynchronizer, ProtocolError, SerialTransport,
        Setpoint, TelemetryRecord, Transport,
    };
    pub use crate::session::{
        LoggingStatusSink, LoggingTelemetrySink, Session, SessionConfig, SessionHandle,
        SessionState, SharedSetpoint, StopSignal,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
