//! Our error types for the DPS PSUs.

use thiserror::Error;

use crate::field::FieldCode;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Top level error type for DPS PSU communications.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Serial communication error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Invalid value: {0}")]
    Validation(#[from] ValidationError),
    #[error("Communication timeout")]
    Timeout,
    #[error("Wrong device on port: expected identifier {expected}, device reports {found}")]
    Identity { expected: u8, found: u8 },
    #[error("Port {0} already has an open connection")]
    PortBusy(String),
    #[error("Property is read-only")]
    ReadOnly,
    #[error("Connection closed")]
    Disconnected,
    #[error("Connection faulted after {0} consecutive protocol errors")]
    Faulted(u32),
}

/// Failure at the OS / serial library boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({kind:?})")]
pub struct TransportError {
    pub kind: embedded_io::ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: embedded_io::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap any [embedded_io::Error], keeping its kind.
    pub fn from_io<E: embedded_io::Error>(err: E) -> Self {
        Self::new(err.kind(), format!("{err:?}"))
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        let kind = match err.kind() {
            serialport::ErrorKind::NoDevice => embedded_io::ErrorKind::NotFound,
            serialport::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            serialport::ErrorKind::Io(io) => crate::transport::io_kind(io),
            serialport::ErrorKind::Unknown => embedded_io::ErrorKind::Other,
        };
        Self::new(kind, err.description)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Transport(err.into())
    }
}

/// Wire level errors produced by the frame codec and the field registry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Checksum mismatch: computed {expected:#04x}, frame carries {found:#04x}")]
    ChecksumMismatch { expected: u8, found: u8 },
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Frame declares {declared} payload bytes but {available} follow the header")]
    LengthMismatch { declared: usize, available: usize },
    #[error("Invalid header byte {0:#04x}")]
    InvalidHeader(u8),
    #[error("Unknown field code {0:#04x}")]
    UnknownField(u8),
    #[error("Payload of {found} bytes does not fit field {field}")]
    ShapeMismatch { field: FieldCode, found: usize },
    #[error("Payload of {0} bytes exceeds the 255 byte limit")]
    PayloadTooLong(usize),
}

/// A local property write outside its descriptor's domain. Never reaches the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("Value is not a member of the enumeration")]
    NotInEnumeration,
    #[error("Expected a {expected} value")]
    WrongType { expected: &'static str },
    #[error("Unknown property `{0}`")]
    UnknownProperty(String),
}
