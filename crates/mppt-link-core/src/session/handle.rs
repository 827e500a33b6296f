//! Background session control
//!
//! `start()` runs a session on its own thread; `stop()` asks it to finish the
//! current period and waits for the transport to be released.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{
    Session, SessionConfig, SessionStats, SetpointProvider, StatusSink, StopSignal, TelemetrySink,
};
use crate::protocol::{DeviceProfile, ProtocolError, Transport};

/// Handle to a session running on a worker thread
pub struct SessionHandle {
    stop: StopSignal,
    worker: Option<JoinHandle<Result<SessionStats, ProtocolError>>>,
}

impl SessionHandle {
    /// Spawn a session worker
    pub fn start<T, C>(
        config: SessionConfig,
        profile: DeviceProfile,
        connect: C,
        setpoint: Arc<dyn SetpointProvider>,
        mut telemetry: Box<dyn TelemetrySink>,
        mut status: Box<dyn StatusSink>,
    ) -> Result<Self, ProtocolError>
    where
        T: Transport + 'static,
        C: FnOnce(&SessionConfig) -> Result<T, ProtocolError> + Send + 'static,
    {
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let name = format!("session-{}", config.port_name);

        let worker = thread::Builder::new().name(name).spawn(move || {
            let mut session = Session::new(config, profile);
            session
                .run(
                    connect,
                    setpoint.as_ref(),
                    telemetry.as_mut(),
                    status.as_mut(),
                    &worker_stop,
                )
                .map(|()| session.stats())
        })?;

        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Signal used to cancel this session; clones may be handed to other threads
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// True once the worker has exited (stopped, or ended on an error)
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Request a stop and wait for the worker to close the transport
    pub fn stop(mut self) -> Result<SessionStats, ProtocolError> {
        self.stop.stop();
        self.join()
    }

    /// Wait for the worker without requesting a stop
    pub fn wait(mut self) -> Result<SessionStats, ProtocolError> {
        self.join()
    }

    fn join(&mut self) -> Result<SessionStats, ProtocolError> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| ProtocolError::WorkerPanicked("session".into()))?,
            None => Err(ProtocolError::NotConnected),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop.stop();
            let _ = self.join();
        }
    }
}
