//! This crate provides an interface for communicating with and controlling the FNIRSI DPS-150
//! programmable bench power supply.
//!
//! The supply enumerates as a USB CDC serial port (VID `2e3c`, PID `5740`) and speaks a small
//! binary protocol: every frame carries a direction byte, an action (`GET`, `SET`, `LOCK`,
//! `BAUD`), a field code, a length, the payload and an additive checksum. A `GET` of the special
//! `ALL` field returns a 139 byte dump of every setting and measurement at once.
//!
//! A connection is opened through a [`connector::Connector`] and yields a [`psu::Psu`]. Each of
//! its properties is a [`value::LiveValue`] that caches the last value the supply reported, can
//! be observed through a channel, and validates writes before they are queued for the device.
//! One I/O thread per connection owns the serial port, so writes from any number of threads
//! reach the wire one whole frame at a time.
//!
//! While connected the front panel is locked. Dropping the [`psu::Psu`] unlocks it again.
//!
//! The serial port is configured like so:
//! * Default baud rate: 115200 (9600, 19200, 38400 and 57600 are also accepted)
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! ```no_run
//! use fnirsi_dps_psu::connector::{Connector, Dps150Connector};
//! use fnirsi_dps_psu::property::Properties;
//!
//! let connector = Dps150Connector::new();
//! let port = connector.list_ports().remove(0);
//! let psu = connector.connect(&port, &Properties::new())?;
//! psu.voltage_set().set(5.0)?;
//! psu.current_set().set(0.5)?;
//! psu.set_output(true)?;
//! println!("{} V", psu.output_voltage().get());
//! # Ok::<(), fnirsi_dps_psu::error::Error>(())
//! ```

pub mod connection;
pub mod connector;
pub mod discovery;
pub mod dump;
pub mod error;
pub mod field;
pub mod frame;
pub mod property;
pub mod psu;
pub mod registry;
pub mod transport;
pub mod types;
pub mod value;

pub use connector::{Connector, ConnectorRegistry, DPS150_USB, Dps150Connector};
pub use error::{Error, Result};
pub use psu::Psu;
pub use value::LiveValue;

#[cfg(test)]
mod mock_serial;
