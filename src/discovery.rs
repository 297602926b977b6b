//! Finding candidate serial ports.
//!
//! Nothing here opens a port. Enumeration failures are logged and reported as
//! an empty list, since a missing device is an ordinary situation.

use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};

/// USB vendor / product pair a connector is looking for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UsbIdentity {
    pub vid: u16,
    pub pid: u16,
}

impl UsbIdentity {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    fn matches(&self, info: &UsbPortInfo) -> bool {
        info.vid == self.vid && info.pid == self.pid
    }
}

impl core::fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
}

/// A discovered endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub transport: TransportKind,
    /// OS path, e.g. `/dev/ttyACM0` or `COM3`. Also the session key.
    pub path: String,
    /// Human readable label.
    pub description: String,
    pub usb: Option<UsbIdentity>,
}

impl Port {
    /// A serial port known only by path.
    pub fn serial(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            transport: TransportKind::Serial,
            description: path.clone(),
            path,
            usb: None,
        }
    }
}

/// Keep only USB serial ports whose VID/PID equal `identity`.
pub fn filter_candidate_ports(ports: Vec<SerialPortInfo>, identity: UsbIdentity) -> Vec<Port> {
    ports
        .into_iter()
        .filter_map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) if identity.matches(&usb) => {
                let description = match (&usb.manufacturer, &usb.product) {
                    (Some(manufacturer), Some(product)) => format!("{manufacturer} {product}"),
                    (None, Some(product)) => product.clone(),
                    _ => format!("USB serial {identity}"),
                };
                Some(Port {
                    transport: TransportKind::Serial,
                    path: info.port_name,
                    description,
                    usb: Some(identity),
                })
            }
            _ => None,
        })
        .collect()
}

/// Enumerate the system's serial ports and keep those matching `identity`.
pub fn list_candidate_ports(identity: UsbIdentity) -> Vec<Port> {
    match serialport::available_ports() {
        Ok(ports) => {
            let candidates = filter_candidate_ports(ports, identity);
            tracing::debug!(%identity, found = candidates.len(), "Enumerated serial ports");
            candidates
        }
        Err(err) => {
            tracing::warn!(%identity, error = %err, "Serial port enumeration failed");
            Vec::new()
        }
    }
}
