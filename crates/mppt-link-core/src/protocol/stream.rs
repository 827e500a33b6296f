//! Transports
//!
//! The session, capture and replay engines only need three things from a
//! link: write a frame, read whatever arrived within a bounded wait, close.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use super::serial::{clear_buffers, configure_port, open_port};
use super::ProtocolError;

/// Polling step while waiting for bytes
const POLL_STEP: Duration = Duration::from_millis(2);

/// Byte transport to a controller (serial port, TCP bridge, test double)
pub trait Transport: Send {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Return the bytes available within `max_wait`.
    ///
    /// An empty vector means nothing arrived; it is not an error.
    fn read_available(&mut self, max_wait: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Release the underlying resource. Further I/O fails with `NotConnected`.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        (**self).write(data)
    }

    fn read_available(&mut self, max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        (**self).read_available(max_wait)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Serial port transport
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open and configure a port for the controller link
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let mut port = open_port(name, Some(baud_rate))?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        tracing::info!(port = name, baud_rate, "serial port opened");

        Ok(Self::new(name, port))
    }

    /// Wrap an already-open port
    pub fn new(name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.to_string(),
            port: Some(port),
        }
    }

    /// Port name the transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        let deadline = Instant::now() + max_wait;

        loop {
            let available = port.bytes_to_read()? as usize;
            if available > 0 {
                let mut buf = vec![0u8; available];
                match port.read(&mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        return Ok(buf);
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "serial port closed");
        }
    }
}

/// TCP transport, for controllers reached through a serial-to-network bridge
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `host:port`
    pub fn connect(addr: &str) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn read_available(&mut self, max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        // A zero read timeout means "block forever" to the OS
        stream.set_read_timeout(Some(max_wait.max(Duration::from_millis(1))))?;

        let mut buf = [0u8; 1024];
        match stream.read(&mut buf) {
            Ok(0) => Err(ProtocolError::SerialError("peer closed the connection".into())),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}
