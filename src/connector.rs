//! Device families and the registry that holds them.
//!
//! A [`Connector`] knows how to find and open one family of supplies. The
//! [`ConnectorRegistry`] is built by the application and passed around;
//! nothing here is global.

use std::sync::Arc;

use crate::connection::{ConnectionConfig, SessionTable};
use crate::discovery::{Port, UsbIdentity};
use crate::error::{Result, TransportError};
use crate::property::{Properties, PropertyDescriptors};
use crate::psu::Psu;
use crate::transport::{SerialBackend, SystemSerial};

/// USB identity of the FNIRSI DPS-150.
pub const DPS150_USB: UsbIdentity = UsbIdentity::new(0x2E3C, 0x5740);

/// Called once with the outcome of [`Connector::connect_async`].
pub type ConnectCallback = Box<dyn FnOnce(Result<Psu>) + Send + 'static>;

/// One supported device family.
pub trait Connector: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Ports that may hold a device of this family.
    fn list_ports(&self) -> Vec<Port>;

    /// Connection time settings accepted by [`Self::connect`].
    fn properties(&self) -> PropertyDescriptors;

    /// Open `port` and run the handshake. Blocks up to the configured timeout.
    fn connect(&self, port: &Port, properties: &Properties) -> Result<Psu>;

    /// [`Self::connect`] on its own thread, handing the result to `on_complete`.
    fn connect_async(
        self: Arc<Self>,
        port: Port,
        properties: Properties,
        on_complete: ConnectCallback,
    ) -> Result<()> {
        std::thread::Builder::new()
            .name(format!("dps-connect {}", port.path))
            .spawn(move || on_complete(self.connect(&port, &properties)))
            .map_err(|err| TransportError::new(embedded_io::ErrorKind::Other, err.to_string()))?;
        Ok(())
    }
}

/// Connector for the FNIRSI DPS-150.
pub struct Dps150Connector<B: SerialBackend = SystemSerial> {
    backend: B,
    sessions: SessionTable,
    identity: UsbIdentity,
}

impl Dps150Connector {
    pub fn new() -> Self {
        Self::with_backend(SystemSerial)
    }
}

impl Default for Dps150Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SerialBackend> Dps150Connector<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            sessions: SessionTable::new(),
            identity: DPS150_USB,
        }
    }

    /// Share port reservations with other connectors.
    pub fn with_sessions(mut self, sessions: SessionTable) -> Self {
        self.sessions = sessions;
        self
    }

    /// Look for a different VID/PID, e.g. a rebadged unit.
    pub fn with_identity(mut self, identity: UsbIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn identity(&self) -> UsbIdentity {
        self.identity
    }

    /// Connect with an already typed configuration.
    pub fn connect_with(&self, port: &Port, config: ConnectionConfig) -> Result<Psu> {
        Psu::connect(&self.backend, &self.sessions, port.clone(), config)
    }
}

impl<B: SerialBackend> Connector for Dps150Connector<B> {
    fn name(&self) -> &str {
        "FNIRSI DPS-150"
    }

    fn list_ports(&self) -> Vec<Port> {
        self.backend.enumerate(self.identity)
    }

    fn properties(&self) -> PropertyDescriptors {
        ConnectionConfig::descriptors()
    }

    fn connect(&self, port: &Port, properties: &Properties) -> Result<Psu> {
        let config = ConnectionConfig::from_properties(properties)?;
        self.connect_with(port, config)
    }
}

/// The connectors an application supports.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connector. One registered under the same name is replaced.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        match self
            .connectors
            .iter_mut()
            .find(|known| known.name() == connector.name())
        {
            Some(known) => {
                tracing::debug!(name = connector.name(), "Replacing connector");
                *known = connector;
            }
            None => self.connectors.push(connector),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|connector| connector.name() == name)
            .cloned()
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    /// Candidate ports of every connector, with the connector that found them.
    pub fn list_ports(&self) -> Vec<(Arc<dyn Connector>, Port)> {
        self.connectors
            .iter()
            .flat_map(|connector| {
                connector
                    .list_ports()
                    .into_iter()
                    .map(move |port| (connector.clone(), port))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{BAUD_RATE_PROPERTY, IDENTIFIER_PROPERTY, LinkState, TIMEOUT_PROPERTY};
    use crate::error::{Error, ValidationError};
    use crate::mock_serial::{FakeBackend, FakeDps};
    use crate::property::PropertyValue;
    use std::sync::mpsc;
    use std::time::Duration;

    fn fake_connector(fake: &FakeDps) -> Dps150Connector<FakeBackend> {
        let ports = vec![Port {
            usb: Some(DPS150_USB),
            ..Port::serial("/dev/ttyACM0")
        }];
        Dps150Connector::with_backend(FakeBackend::new(fake.clone()).with_ports(ports))
    }

    fn props(entries: &[(&str, u32)]) -> Properties {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), PropertyValue::Uint(*value)))
            .collect()
    }

    #[test]
    fn describes_connection_settings() {
        let connector = fake_connector(&FakeDps::new());
        let names: Vec<String> = connector.properties().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, [BAUD_RATE_PROPERTY, IDENTIFIER_PROPERTY, TIMEOUT_PROPERTY]);
        assert_eq!(connector.identity(), DPS150_USB);
    }

    #[test]
    fn connect_applies_properties() {
        let fake = FakeDps::new();
        let connector = fake_connector(&fake);
        let port = connector.list_ports().remove(0);

        let psu = connector
            .connect(&port, &props(&[(BAUD_RATE_PROPERTY, 9600), (IDENTIFIER_PROPERTY, 7)]))
            .unwrap();
        assert_eq!(psu.config().baud_rate, 9600);
        assert_eq!(fake.baud_index(), Some(1));
        assert_eq!(psu.port(), &port);
        assert!(connector.sessions().is_open(&port.path));

        drop(psu);
        assert!(!connector.sessions().is_open(&port.path));
    }

    #[test]
    fn connect_rejects_bad_properties() {
        let fake = FakeDps::new();
        let connector = fake_connector(&fake);
        let port = Port::serial("/dev/ttyACM0");

        assert!(matches!(
            connector.connect(&port, &props(&[(TIMEOUT_PROPERTY, 5)])),
            Err(Error::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert!(matches!(
            connector.connect(&port, &props(&[("parity", 0)])),
            Err(Error::Validation(ValidationError::UnknownProperty(_)))
        ));
        // Nothing was opened.
        assert!(fake.written_data().is_empty());
    }

    #[test]
    fn unplugged_device_releases_port() {
        let connector = Dps150Connector::with_backend(FakeBackend::new(FakeDps::new()).unplugged());
        let port = Port::serial("/dev/ttyACM3");

        match connector.connect(&port, &Properties::new()) {
            Err(Error::Transport(err)) => assert_eq!(err.kind, embedded_io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(!connector.sessions().is_open(&port.path));
    }

    #[test]
    fn shared_sessions_span_connectors() {
        let fake = FakeDps::new();
        let first = fake_connector(&fake);
        let second = fake_connector(&fake).with_sessions(first.sessions().clone());
        let port = Port::serial("/dev/ttyACM0");

        let _psu = first.connect(&port, &Properties::new()).unwrap();
        assert!(matches!(
            second.connect(&port, &Properties::new()),
            Err(Error::PortBusy(_))
        ));
    }

    #[test]
    fn connect_async_reports_completion() {
        let fake = FakeDps::new();
        let connector = Arc::new(fake_connector(&fake));
        let (done, outcome) = mpsc::channel();

        connector
            .connect_async(
                Port::serial("/dev/ttyACM0"),
                Properties::new(),
                Box::new(move |result| {
                    let _ = done.send(result);
                }),
            )
            .unwrap();

        let psu = outcome.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(psu.link_state().get(), LinkState::Connected);
    }

    #[test]
    fn registry_finds_connectors_and_ports() {
        let fake = FakeDps::new();
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(fake_connector(&fake)));
        registry.register(Arc::new(fake_connector(&fake)));

        assert_eq!(registry.connectors().len(), 1);
        assert!(registry.get("FNIRSI DPS-150").is_some());
        assert!(registry.get("Sinilink XY").is_none());

        let ports = registry.list_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].0.name(), "FNIRSI DPS-150");
        assert_eq!(ports[0].1.usb, Some(DPS150_USB));
    }
}
