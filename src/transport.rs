//! Byte transports the connection thread talks through.
//!
//! The connection layer only needs [embedded_io::Read] & [embedded_io::Write].
//! [`SerialBackend`] is the seam that produces such a transport from a port
//! path, so tests can plug in a fake device instead of an OS serial port.

use std::time::Duration;

use serialport::SerialPort;

use crate::discovery::{self, Port, UsbIdentity};
use crate::error::Result;

/// Opens transports and lists ports for a connector.
pub trait SerialBackend: Send + Sync + 'static {
    type Transport: embedded_io::Read + embedded_io::Write + Send + 'static;

    /// Open `path` at `baud_rate`. Reads give up after `read_timeout` with
    /// [embedded_io::ErrorKind::TimedOut].
    fn open(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self::Transport>;

    /// Ports that look like the device.
    fn enumerate(&self, identity: UsbIdentity) -> Vec<Port>;
}

/// The operating system's serial ports, through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    type Transport = PortWrapper;

    fn open(&self, path: &str, baud_rate: u32, read_timeout: Duration) -> Result<PortWrapper> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()?;
        Ok(PortWrapper(port))
    }

    fn enumerate(&self, identity: UsbIdentity) -> Vec<Port> {
        discovery::list_candidate_ports(identity)
    }
}

/// A `serialport` handle exposed through [embedded_io].
pub struct PortWrapper(Box<dyn SerialPort>);

impl PortWrapper {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self(port)
    }
}

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        io_kind(self.0.kind())
    }
}

/// Map a std I/O error kind onto its [embedded_io] counterpart.
pub(crate) fn io_kind(kind: std::io::ErrorKind) -> embedded_io::ErrorKind {
    use embedded_io::ErrorKind as E;
    use std::io::ErrorKind as S;
    match kind {
        S::NotFound => E::NotFound,
        S::PermissionDenied => E::PermissionDenied,
        S::ConnectionRefused => E::ConnectionRefused,
        S::ConnectionReset => E::ConnectionReset,
        S::ConnectionAborted => E::ConnectionAborted,
        S::NotConnected => E::NotConnected,
        S::BrokenPipe => E::BrokenPipe,
        S::AlreadyExists => E::AlreadyExists,
        S::InvalidInput => E::InvalidInput,
        S::InvalidData => E::InvalidData,
        S::TimedOut | S::WouldBlock => E::TimedOut,
        S::Interrupted => E::Interrupted,
        S::Unsupported => E::Unsupported,
        S::OutOfMemory => E::OutOfMemory,
        _ => E::Other,
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}
