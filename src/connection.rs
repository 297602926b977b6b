//! Connection configuration, the port session table and the per-connection
//! I/O thread.
//!
//! Each open device gets one `std::thread` that owns the transport. It is the
//! only writer: live values enqueue [`Request`]s, the thread turns them into
//! frames, and everything the device reports is decoded and handed to an
//! [`Inbound`] sink in arrival order.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use embedded_io::{Error as _, ErrorKind};
use strum_macros::{EnumIter, FromRepr, IntoStaticStr};

use crate::error::{Error, ProtocolError, Result, TransportError, ValidationError};
use crate::field::FieldCode;
use crate::frame::{Action, Direction, Frame, FrameDecoder};
use crate::property::{
    Properties, PropertyDescriptor, PropertyDescriptors, PropertyType, PropertyValue,
};
use crate::registry::{self, FieldValue};
use crate::types::BAUD_RATES;
use crate::value::LiveValue;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(50);
pub const DEFAULT_FAULT_THRESHOLD: u32 = 8;

/// Connector property names.
pub const BAUD_RATE_PROPERTY: &str = "baud_rate";
pub const IDENTIFIER_PROPERTY: &str = "identifier";
pub const TIMEOUT_PROPERTY: &str = "timeout_ms";

/// Work for the I/O thread.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request {
    /// `SET` of one field.
    Write { field: FieldCode, value: FieldValue },
    /// `GET` of one field.
    Query { field: FieldCode },
    /// `LOCK` / `BAUD` control frame.
    Control { action: Action, value: u8 },
    /// Release the device and stop the thread.
    Close,
}

/// Lifecycle of a connection.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum LinkState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Negotiating = 2,
    Connected = 3,
    Disconnecting = 4,
    /// Too many consecutive protocol errors, or the transport failed.
    Faulted = 5,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn descriptor() -> PropertyDescriptor {
        use strum::IntoEnumIterator;
        PropertyDescriptor::enumeration(LinkState::iter().map(|state| (state.name(), state as u32)))
    }
}

impl PropertyType for LinkState {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(*self as u32)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        LinkState::from_repr(u8::try_from(value.as_uint()?).ok()?)
    }
}

/// Typed connection-time settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub baud_rate: u32,
    /// Expected device identifier. `None` skips the check.
    pub identifier: Option<u8>,
    /// Handshake and query timeout.
    pub timeout: Duration,
    /// How long the I/O thread waits for work when the line is quiet.
    pub idle_poll: Duration,
    /// Consecutive protocol errors tolerated before the connection faults.
    pub fault_threshold: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            identifier: None,
            timeout: DEFAULT_TIMEOUT,
            idle_poll: DEFAULT_IDLE_POLL,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
        }
    }
}

impl ConnectionConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_identifier(mut self, identifier: u8) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_fault_threshold(mut self, fault_threshold: u32) -> Self {
        self.fault_threshold = fault_threshold.max(1);
        self
    }

    /// Descriptors of the settings a connector accepts.
    pub fn descriptors() -> PropertyDescriptors {
        let bauds: Vec<(String, u32)> = BAUD_RATES
            .iter()
            .filter(|rate| **rate != 0)
            .map(|rate| (rate.to_string(), *rate))
            .collect();
        vec![
            (
                BAUD_RATE_PROPERTY.to_string(),
                PropertyDescriptor::enumeration(bauds.iter().map(|(name, rate)| (name.as_str(), *rate))),
            ),
            (
                IDENTIFIER_PROPERTY.to_string(),
                PropertyDescriptor::UintRange { min: 0, max: 30 },
            ),
            (
                TIMEOUT_PROPERTY.to_string(),
                PropertyDescriptor::UintRange {
                    min: 100,
                    max: 60_000,
                },
            ),
        ]
    }

    /// Build a configuration from connector properties. Missing entries keep
    /// their defaults; unknown or out of domain entries are rejected.
    pub fn from_properties(properties: &Properties) -> Result<Self, ValidationError> {
        let descriptors = Self::descriptors();
        let mut config = Self::default();
        for (name, value) in properties {
            let (_, descriptor) = descriptors
                .iter()
                .find(|(known, _)| known == name)
                .ok_or_else(|| ValidationError::UnknownProperty(name.clone()))?;
            descriptor.validate(value)?;
            // Every connector property is an unsigned integer.
            let raw = value.as_uint().ok_or(ValidationError::WrongType {
                expected: "unsigned integer",
            })?;
            match name.as_str() {
                BAUD_RATE_PROPERTY => config.baud_rate = raw,
                IDENTIFIER_PROPERTY => config.identifier = u8::try_from(raw).ok(),
                TIMEOUT_PROPERTY => config.timeout = Duration::from_millis(raw as u64),
                _ => {}
            }
        }
        Ok(config)
    }
}

/// Ports with an open connection, keyed by path.
///
/// Shared by all connections made through one connector.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    ports: Arc<Mutex<HashSet<String>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `path`, failing with [`Error::PortBusy`] if it is taken.
    pub fn claim(&self, path: &str) -> Result<SessionGuard> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        if !ports.insert(path.to_string()) {
            return Err(Error::PortBusy(path.to_string()));
        }
        Ok(SessionGuard {
            table: self.clone(),
            path: path.to_string(),
        })
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    fn release(&self, path: &str) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

/// A claimed port. Dropping it frees the port.
#[derive(Debug)]
pub struct SessionGuard {
    table: SessionTable,
    path: String,
}

impl SessionGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.release(&self.path);
        tracing::trace!(port = %self.path, "Port released");
    }
}

/// Receiver of everything the device reports.
pub(crate) trait Inbound: Send + Sync + 'static {
    fn deliver(&self, field: FieldCode, value: FieldValue);

    /// The I/O thread has stopped; no further values will arrive.
    fn closed(&self);
}

/// Handle to a running I/O thread.
pub(crate) struct Connection {
    port: String,
    requests: Sender<Request>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start the I/O thread for an opened transport.
    pub(crate) fn spawn<T>(
        transport: T,
        session: SessionGuard,
        config: &ConnectionConfig,
        inbound: Arc<dyn Inbound>,
        link: LiveValue<LinkState>,
    ) -> Result<Self>
    where
        T: embedded_io::Read + embedded_io::Write + Send + 'static,
    {
        let (requests, queue) = mpsc::channel();
        let port = session.path().to_string();
        let worker = IoWorker {
            port: port.clone(),
            transport,
            queue,
            inbound,
            link,
            decoder: FrameDecoder::new(),
            idle_poll: config.idle_poll,
            fault_threshold: config.fault_threshold.max(1),
            faults: 0,
            read_failures: 0,
            session,
        };
        let handle = std::thread::Builder::new()
            .name(format!("dps-io {port}"))
            .spawn(move || worker.run())
            .map_err(|err| TransportError::new(ErrorKind::Other, err.to_string()))?;
        Ok(Self {
            port,
            requests,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn port(&self) -> &str {
        &self.port
    }

    /// A queue handle for binding live values.
    pub(crate) fn requests(&self) -> Sender<Request> {
        self.requests.clone()
    }

    pub(crate) fn send(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::Disconnected)
    }

    /// Stop the I/O thread and wait for it. Only the first call has an effect.
    pub(crate) fn close(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The thread may already have exited after a fault.
            let _ = self.requests.send(Request::Close);
            if handle.join().is_err() {
                tracing::error!(port = %self.port, "I/O thread panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

struct IoWorker<T> {
    port: String,
    transport: T,
    queue: Receiver<Request>,
    inbound: Arc<dyn Inbound>,
    link: LiveValue<LinkState>,
    decoder: FrameDecoder,
    idle_poll: Duration,
    fault_threshold: u32,
    faults: u32,
    read_failures: u32,
    session: SessionGuard,
}

impl<T: embedded_io::Read + embedded_io::Write> IoWorker<T> {
    fn run(mut self) {
        tracing::debug!(port = %self.port, "I/O thread started");
        let outcome = self.serve();
        // Hand the front panel back, best effort on a failed line.
        if let Err(err) = self.send_frame(&Frame::control(Action::Lock, 0)) {
            tracing::debug!(port = %self.port, error = %err, "Unlock not sent");
        }
        // Values are unbound before a fault is published.
        self.inbound.closed();
        match outcome {
            Ok(()) => tracing::debug!(port = %self.port, "Connection closed"),
            Err(err) => {
                tracing::error!(port = %self.port, error = %err, "Connection faulted");
                self.link.update(LinkState::Faulted);
            }
        }
        let IoWorker {
            transport, session, ..
        } = self;
        drop(transport);
        drop(session);
    }

    /// Pump requests and replies until closed. An error means the connection faulted.
    fn serve(&mut self) -> Result<()> {
        let mut buf = [0u8; 256];
        loop {
            loop {
                match self.queue.try_recv() {
                    Ok(Request::Close) | Err(TryRecvError::Disconnected) => return Ok(()),
                    Ok(request) => self.write(request)?,
                    Err(TryRecvError::Empty) => break,
                }
            }

            match self.transport.read(&mut buf) {
                Ok(0) => {}
                Ok(len) => {
                    self.read_failures = 0;
                    self.receive(&buf[..len])?;
                    continue;
                }
                // No data available right now.
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                // Unclassified OS errors may pass, a line that keeps failing is dead.
                Err(err) if err.kind() == ErrorKind::Other => {
                    self.read_failures += 1;
                    tracing::debug!(
                        port = %self.port,
                        error = ?err,
                        consecutive = self.read_failures,
                        "Read failed"
                    );
                    if self.read_failures >= self.fault_threshold {
                        return Err(TransportError::from_io(err).into());
                    }
                }
                Err(err) => return Err(TransportError::from_io(err).into()),
            }

            match self.queue.recv_timeout(self.idle_poll) {
                Ok(Request::Close) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Ok(request) => self.write(request)?,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn write(&mut self, request: Request) -> Result<()> {
        let frame = match request {
            Request::Write { field, value } => match registry::encode_payload(field, &value) {
                Ok(payload) => Frame::with_payload(Direction::Tx, Action::Set, field, payload),
                Err(err) => {
                    tracing::warn!(port = %self.port, %field, error = %err, "Dropping unencodable write");
                    return Ok(());
                }
            },
            Request::Query { field } => Frame::request(Action::Get, field),
            Request::Control { action, value } => Frame::control(action, value),
            Request::Close => return Ok(()),
        };
        self.send_frame(&frame)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        tracing::trace!(port = %self.port, ?frame, "TX");
        self.transport
            .write_all(&frame.to_bytes())
            .map_err(TransportError::from_io)?;
        self.transport.flush().map_err(TransportError::from_io)?;
        Ok(())
    }

    fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(err) = self.decoder.push(bytes) {
            self.protocol_error(err)?;
        }
        while let Some(result) = self.decoder.next_frame() {
            match result.and_then(|frame| self.route(frame)) {
                Ok(()) => self.faults = 0,
                Err(err) => self.protocol_error(err)?,
            }
        }
        Ok(())
    }

    fn route(&self, frame: Frame) -> Result<(), ProtocolError> {
        tracing::trace!(port = %self.port, ?frame, "RX");
        // Our own frames echoed back, control acknowledgements and empty
        // SET acknowledgements carry nothing to apply.
        if frame.direction() != Direction::Rx
            || frame.field() == FieldCode::None
            || frame.payload().is_empty()
        {
            return Ok(());
        }
        let value = registry::decode_payload(frame.field(), frame.payload())?;
        self.inbound.deliver(frame.field(), value);
        Ok(())
    }

    fn protocol_error(&mut self, err: ProtocolError) -> Result<()> {
        self.faults += 1;
        tracing::warn!(
            port = %self.port,
            error = %err,
            consecutive = self.faults,
            "Discarded frame"
        );
        if self.faults >= self.fault_threshold {
            return Err(Error::Faulted(self.faults));
        }
        Ok(())
    }
}
