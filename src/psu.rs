use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use strum::IntoEnumIterator;

use crate::connection::{Connection, ConnectionConfig, Inbound, LinkState, Request, SessionTable};
use crate::discovery::Port;
use crate::dump::{Dump, PRESET_COUNT};
use crate::error::{Error, Result, ValidationError};
use crate::field::{Access, FieldCode};
use crate::frame::Action;
use crate::property::{PropertyDescriptor, PropertyType, PropertyValue, ScalarType};
use crate::registry::FieldValue;
use crate::transport::SerialBackend;
use crate::types::{ProtectionState, RegulationMode, baud_rate_index};
use crate::value::{DynValue, LiveValue};

/// Limits assumed until the device reports its own ceilings.
const DEFAULT_MAX_VOLTAGE: f32 = 30.0;
const DEFAULT_MAX_CURRENT: f32 = 5.1;
const DEFAULT_MAX_POWER: f32 = 150.0;
const DEFAULT_MAX_TEMPERATURE: f32 = 99.0;

/// Fields requested during the handshake, in order. The dump comes last and
/// completes the handshake.
const HANDSHAKE_FIELDS: [FieldCode; 9] = [
    FieldCode::ModelName,
    FieldCode::HardwareVersion,
    FieldCode::FirmwareVersion,
    FieldCode::Protection,
    FieldCode::Identifier,
    FieldCode::CvCc,
    FieldCode::Brightness,
    FieldCode::Volume,
    FieldCode::All,
];

/// One of the six stored voltage / current presets (M1 - M6).
pub struct Preset {
    voltage: LiveValue<f32>,
    current: LiveValue<f32>,
}

impl Preset {
    pub fn voltage(&self) -> &LiveValue<f32> {
        &self.voltage
    }

    pub fn current(&self) -> &LiveValue<f32> {
        &self.current
    }

    /// Store both values. The voltage is not written if the current is rejected.
    pub fn set(&self, voltage: f32, current: f32) -> Result<()> {
        self.current.descriptor().validate(&current.to_property())?;
        self.voltage.set(voltage)?;
        self.current.set(current)
    }
}

/// A named property as listed by [`Psu::properties`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub descriptor: PropertyDescriptor,
    pub value: PropertyValue,
    pub readonly: bool,
}

struct Values {
    link: LiveValue<LinkState>,
    input_voltage: LiveValue<f32>,
    voltage_set: LiveValue<f32>,
    current_set: LiveValue<f32>,
    output_voltage: LiveValue<f32>,
    output_current: LiveValue<f32>,
    output_power: LiveValue<f32>,
    temperature: LiveValue<f32>,
    presets: Vec<Preset>,
    ovp: LiveValue<f32>,
    ocp: LiveValue<f32>,
    opp: LiveValue<f32>,
    otp: LiveValue<f32>,
    lvp: LiveValue<f32>,
    brightness: LiveValue<u8>,
    volume: LiveValue<u8>,
    metering: LiveValue<bool>,
    capacity: LiveValue<f32>,
    energy: LiveValue<f32>,
    running: LiveValue<bool>,
    protection: LiveValue<ProtectionState>,
    mode: LiveValue<RegulationMode>,
    identifier: LiveValue<u8>,
    model_name: LiveValue<String>,
    hardware_version: LiveValue<String>,
    firmware_version: LiveValue<String>,
    max_voltage: LiveValue<f32>,
    max_current: LiveValue<f32>,
    max_ovp: LiveValue<f32>,
    max_ocp: LiveValue<f32>,
    max_opp: LiveValue<f32>,
    max_otp: LiveValue<f32>,
    max_lvp: LiveValue<f32>,
    snapshot: LiveValue<Option<Dump>>,
    /// Values fed by a single scalar field, in field order.
    fields: Vec<(FieldCode, Box<dyn DynValue>)>,
}

fn entry<T: PropertyType>(field: FieldCode, value: &LiveValue<T>) -> (FieldCode, Box<dyn DynValue>) {
    (field, Box::new(value.clone()))
}

fn range(max: f32) -> PropertyDescriptor {
    PropertyDescriptor::FloatRange { min: 0.0, max }
}

impl Values {
    fn new() -> Self {
        use FieldCode as F;

        let setting = |field: FieldCode, max: f32| LiveValue::new(field.name(), 0.0f32, range(max));
        let reading = |name: &'static str| {
            LiveValue::new(name, 0.0f32, PropertyDescriptor::Scalar(ScalarType::Float))
        };
        let text = |field: FieldCode| {
            LiveValue::new(field.name(), String::new(), PropertyDescriptor::Scalar(ScalarType::Text))
        };
        let flag = |field: FieldCode| LiveValue::new(field.name(), false, PropertyDescriptor::flag());
        let level = |field: FieldCode, min: u32, max: u32| {
            LiveValue::new(field.name(), min as u8, PropertyDescriptor::UintRange { min, max })
        };

        let presets: Vec<Preset> = (0..PRESET_COUNT)
            .filter_map(FieldCode::preset)
            .map(|(voltage, current)| Preset {
                voltage: setting(voltage, DEFAULT_MAX_VOLTAGE),
                current: setting(current, DEFAULT_MAX_CURRENT),
            })
            .collect();

        let mut values = Values {
            link: LiveValue::new("link_state", LinkState::Disconnected, LinkState::descriptor()),
            input_voltage: reading(F::InputVoltage.name()),
            voltage_set: setting(F::VSet, DEFAULT_MAX_VOLTAGE),
            current_set: setting(F::ISet, DEFAULT_MAX_CURRENT),
            output_voltage: reading("output_voltage"),
            output_current: reading("output_current"),
            output_power: reading("output_power"),
            temperature: reading(F::Temperature.name()),
            presets,
            ovp: setting(F::Ovp, DEFAULT_MAX_VOLTAGE),
            ocp: setting(F::Ocp, DEFAULT_MAX_CURRENT),
            opp: setting(F::Opp, DEFAULT_MAX_POWER),
            otp: setting(F::Otp, DEFAULT_MAX_TEMPERATURE),
            lvp: setting(F::Lvp, DEFAULT_MAX_VOLTAGE),
            brightness: level(F::Brightness, 1, 14),
            volume: level(F::Volume, 0, 15),
            metering: flag(F::Metering),
            capacity: reading(F::Capacity.name()),
            energy: reading(F::Energy.name()),
            running: flag(F::Running),
            protection: LiveValue::new(
                F::Protection.name(),
                ProtectionState::Ok,
                PropertyDescriptor::enumeration(
                    ProtectionState::iter().map(|state| (state.name(), state as u32)),
                ),
            ),
            mode: LiveValue::new(
                F::CvCc.name(),
                RegulationMode::Cv,
                PropertyDescriptor::enumeration(
                    RegulationMode::iter().map(|mode| (mode.name(), bool::from(mode) as u32)),
                ),
            ),
            identifier: level(F::Identifier, 0, 30),
            model_name: text(F::ModelName),
            hardware_version: text(F::HardwareVersion),
            firmware_version: text(F::FirmwareVersion),
            max_voltage: reading(F::MaxVoltage.name()),
            max_current: reading(F::MaxCurrent.name()),
            max_ovp: reading(F::MaxOvp.name()),
            max_ocp: reading(F::MaxOcp.name()),
            max_opp: reading(F::MaxOpp.name()),
            max_otp: reading(F::MaxOtp.name()),
            max_lvp: reading(F::MaxLvp.name()),
            // Not settable, the descriptor admits nothing.
            snapshot: LiveValue::new("dump", None, PropertyDescriptor::Enumerated(Vec::new())),
            fields: Vec::new(),
        };

        let mut fields = vec![
            entry(F::InputVoltage, &values.input_voltage),
            entry(F::VSet, &values.voltage_set),
            entry(F::ISet, &values.current_set),
            entry(F::Temperature, &values.temperature),
        ];
        for (index, preset) in values.presets.iter().enumerate() {
            if let Some((voltage, current)) = FieldCode::preset(index) {
                fields.push(entry(voltage, &preset.voltage));
                fields.push(entry(current, &preset.current));
            }
        }
        fields.extend([
            entry(F::Ovp, &values.ovp),
            entry(F::Ocp, &values.ocp),
            entry(F::Opp, &values.opp),
            entry(F::Otp, &values.otp),
            entry(F::Lvp, &values.lvp),
            entry(F::Brightness, &values.brightness),
            entry(F::Volume, &values.volume),
            entry(F::Metering, &values.metering),
            entry(F::Capacity, &values.capacity),
            entry(F::Energy, &values.energy),
            entry(F::Running, &values.running),
            entry(F::Protection, &values.protection),
            entry(F::CvCc, &values.mode),
            entry(F::ModelName, &values.model_name),
            entry(F::HardwareVersion, &values.hardware_version),
            entry(F::FirmwareVersion, &values.firmware_version),
            entry(F::Identifier, &values.identifier),
            entry(F::MaxVoltage, &values.max_voltage),
            entry(F::MaxCurrent, &values.max_current),
            entry(F::MaxOvp, &values.max_ovp),
            entry(F::MaxOcp, &values.max_ocp),
            entry(F::MaxOpp, &values.max_opp),
            entry(F::MaxOtp, &values.max_otp),
            entry(F::MaxLvp, &values.max_lvp),
        ]);
        values.fields = fields;
        values
    }

    fn bind(&self, requests: &Sender<Request>) {
        for (field, value) in &self.fields {
            value.bind(requests.clone(), *field, field.access() == Access::ReadWrite);
        }
        for output in [&self.output_voltage, &self.output_current, &self.output_power] {
            output.bind(requests.clone(), FieldCode::Measurement, false);
        }
        self.snapshot.bind(requests.clone(), FieldCode::All, false);
    }

    /// Everything listed by [`Psu::properties`], measurements first.
    fn listed(&self) -> Vec<&dyn DynValue> {
        let mut listed: Vec<&dyn DynValue> = Vec::with_capacity(self.fields.len() + 4);
        listed.push(&self.link);
        for output in [&self.output_voltage, &self.output_current, &self.output_power] {
            listed.push(output);
        }
        listed.extend(self.fields.iter().map(|(_, value)| value.as_ref()));
        listed
    }

    fn deliver_scalar(&self, field: FieldCode, value: &FieldValue) {
        let Some((_, target)) = self.fields.iter().find(|(known, _)| *known == field) else {
            tracing::debug!(%field, "No property for field");
            return;
        };
        if !target.accept(value) {
            tracing::warn!(%field, ?value, "Ignoring value of the wrong type");
            return;
        }
        if let Some(max) = value.as_scalar().and_then(PropertyValue::as_float) {
            self.apply_ceiling(field, max);
        }
    }

    /// Re-bound settings from a reported maximum.
    fn apply_ceiling(&self, field: FieldCode, max: f32) {
        let targets: Vec<&LiveValue<f32>> = match field {
            FieldCode::MaxVoltage => std::iter::once(&self.voltage_set)
                .chain(self.presets.iter().map(|preset| &preset.voltage))
                .collect(),
            FieldCode::MaxCurrent => std::iter::once(&self.current_set)
                .chain(self.presets.iter().map(|preset| &preset.current))
                .collect(),
            FieldCode::MaxOvp => vec![&self.ovp],
            FieldCode::MaxOcp => vec![&self.ocp],
            FieldCode::MaxOpp => vec![&self.opp],
            FieldCode::MaxOtp => vec![&self.otp],
            FieldCode::MaxLvp => vec![&self.lvp],
            _ => return,
        };
        for target in targets {
            target.set_descriptor(range(max));
        }
    }
}

impl Inbound for Values {
    fn deliver(&self, field: FieldCode, value: FieldValue) {
        match value {
            FieldValue::Triple(measurement) => {
                self.output_voltage.update(measurement.voltage);
                self.output_current.update(measurement.current);
                self.output_power.update(measurement.power);
            }
            FieldValue::Dump(dump) => {
                for (field, value) in dump.fields() {
                    self.deliver(field, value);
                }
                // Last, so whoever waits on the snapshot sees the fields applied.
                self.snapshot.update(Some(*dump));
            }
            FieldValue::Scalar(_) => self.deliver_scalar(field, &value),
        }
    }

    fn closed(&self) {
        for (_, value) in &self.fields {
            value.unbind();
        }
        for output in [&self.output_voltage, &self.output_current, &self.output_power] {
            output.unbind();
        }
        self.snapshot.unbind();
    }
}

/// A connected DPS power supply.
///
/// Every property is a [`LiveValue`]: reads return the last reported value,
/// writes are validated locally and sent to the device by the connection's
/// I/O thread. Dropping the handle disconnects.
pub struct Psu {
    port: Port,
    config: ConnectionConfig,
    values: Arc<Values>,
    connection: Connection,
    closed: AtomicBool,
}

impl Psu {
    /// Claim and open `port`, then run the handshake.
    ///
    /// No handle is returned unless the device answered with a full dump
    /// within the timeout and, if configured, the expected identifier.
    pub(crate) fn connect<B: SerialBackend>(
        backend: &B,
        sessions: &SessionTable,
        port: Port,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let values = Arc::new(Values::new());
        values.link.update(LinkState::Connecting);
        tracing::info!(port = %port.path, baud_rate = config.baud_rate, "Connecting");

        let session = sessions.claim(&port.path)?;
        let transport = backend.open(&port.path, config.baud_rate, config.idle_poll)?;
        values.link.update(LinkState::Negotiating);
        let connection =
            Connection::spawn(transport, session, &config, values.clone(), values.link.clone())?;
        values.bind(&connection.requests());

        let psu = Psu {
            port,
            config,
            values,
            connection,
            closed: AtomicBool::new(false),
        };
        if let Err(err) = psu.negotiate() {
            tracing::warn!(port = %psu.port.path, error = %err, "Handshake failed");
            psu.disconnect();
            return Err(err);
        }
        psu.values.link.update(LinkState::Connected);
        Ok(psu)
    }

    fn negotiate(&self) -> Result<()> {
        let dumps = self.values.snapshot.subscribe();
        let baud_index = baud_rate_index(self.config.baud_rate);
        tracing::debug!(port = %self.port.path, baud_index, "Negotiating");

        self.connection.send(Request::Control {
            action: Action::Lock,
            value: 1,
        })?;
        self.connection.send(Request::Control {
            action: Action::Baud,
            value: baud_index,
        })?;
        for field in HANDSHAKE_FIELDS {
            self.connection.send(Request::Query { field })?;
        }

        let deadline = Instant::now() + self.config.timeout;
        let dump = loop {
            match dumps.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(Some(dump)) => break dump,
                Ok(None) => {}
                Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(match self.values.link.get() {
                        LinkState::Faulted => Error::Faulted(self.config.fault_threshold),
                        _ => Error::Disconnected,
                    });
                }
            }
        };

        if let Some(expected) = self.config.identifier {
            if dump.identifier != expected {
                return Err(Error::Identity {
                    expected,
                    found: dump.identifier,
                });
            }
        }
        tracing::info!(
            port = %self.port.path,
            model = %self.values.model_name.get(),
            hardware = %self.values.hardware_version.get(),
            firmware = %self.values.firmware_version.get(),
            identifier = dump.identifier,
            "Connected"
        );
        Ok(())
    }

    /// Release the device: unlock the front panel, stop the I/O thread and
    /// free the port. Later calls do nothing.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.values.link.get() != LinkState::Faulted {
            self.values.link.update(LinkState::Disconnecting);
        }
        self.connection.close();
        self.values.link.update(LinkState::Disconnected);
        tracing::info!(port = %self.connection.port(), "Disconnected");
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Every named property with its descriptor and current value.
    pub fn properties(&self) -> Vec<PropertyInfo> {
        self.values
            .listed()
            .into_iter()
            .map(|value| PropertyInfo {
                name: value.name(),
                descriptor: value.descriptor(),
                value: value.value(),
                readonly: value.readonly(),
            })
            .collect()
    }

    /// Write a property by name, see [`Self::properties`].
    pub fn set_property(&self, name: &str, value: &PropertyValue) -> Result<()> {
        let target = self
            .values
            .listed()
            .into_iter()
            .find(|target| target.name() == name)
            .ok_or_else(|| ValidationError::UnknownProperty(name.to_string()))?;
        target.set_value(value)
    }

    /// Request a full dump. Values update as it arrives.
    pub fn refresh(&self) -> Result<()> {
        self.values.snapshot.query()
    }

    /// Request a full dump and wait for it.
    pub fn refresh_wait(&self) -> Result<Dump> {
        self.values
            .snapshot
            .query_wait(self.config.timeout)?
            .ok_or(Error::Disconnected)
    }

    /// Switch the output on or off.
    pub fn set_output(&self, on: bool) -> Result<()> {
        self.values.running.set(on)
    }

    /// Start or stop capacity and energy metering.
    pub fn set_metering(&self, on: bool) -> Result<()> {
        self.values.metering.set(on)
    }

    pub fn link_state(&self) -> &LiveValue<LinkState> {
        &self.values.link
    }

    /// Latest full dump.
    pub fn snapshot(&self) -> &LiveValue<Option<Dump>> {
        &self.values.snapshot
    }

    pub fn input_voltage(&self) -> &LiveValue<f32> {
        &self.values.input_voltage
    }

    /// Output voltage setting, volts.
    pub fn voltage_set(&self) -> &LiveValue<f32> {
        &self.values.voltage_set
    }

    /// Output current limit, amps.
    pub fn current_set(&self) -> &LiveValue<f32> {
        &self.values.current_set
    }

    pub fn output_voltage(&self) -> &LiveValue<f32> {
        &self.values.output_voltage
    }

    pub fn output_current(&self) -> &LiveValue<f32> {
        &self.values.output_current
    }

    pub fn output_power(&self) -> &LiveValue<f32> {
        &self.values.output_power
    }

    pub fn temperature(&self) -> &LiveValue<f32> {
        &self.values.temperature
    }

    pub fn presets(&self) -> &[Preset] {
        &self.values.presets
    }

    /// Preset by index, 0 - 5 for M1 - M6.
    pub fn preset(&self, index: usize) -> Option<&Preset> {
        self.values.presets.get(index)
    }

    /// Over voltage protection threshold, volts.
    pub fn ovp(&self) -> &LiveValue<f32> {
        &self.values.ovp
    }

    /// Over current protection threshold, amps.
    pub fn ocp(&self) -> &LiveValue<f32> {
        &self.values.ocp
    }

    /// Over power protection threshold, watts.
    pub fn opp(&self) -> &LiveValue<f32> {
        &self.values.opp
    }

    /// Over temperature protection threshold, Celsius.
    pub fn otp(&self) -> &LiveValue<f32> {
        &self.values.otp
    }

    /// Low input voltage protection threshold, volts.
    pub fn lvp(&self) -> &LiveValue<f32> {
        &self.values.lvp
    }

    pub fn brightness(&self) -> &LiveValue<u8> {
        &self.values.brightness
    }

    pub fn volume(&self) -> &LiveValue<u8> {
        &self.values.volume
    }

    pub fn metering(&self) -> &LiveValue<bool> {
        &self.values.metering
    }

    /// Accumulated capacity, amp-hours.
    pub fn capacity(&self) -> &LiveValue<f32> {
        &self.values.capacity
    }

    /// Accumulated energy, watt-hours.
    pub fn energy(&self) -> &LiveValue<f32> {
        &self.values.energy
    }

    /// Whether the output is on.
    pub fn running(&self) -> &LiveValue<bool> {
        &self.values.running
    }

    pub fn protection_state(&self) -> &LiveValue<ProtectionState> {
        &self.values.protection
    }

    pub fn regulation_mode(&self) -> &LiveValue<RegulationMode> {
        &self.values.mode
    }

    pub fn identifier(&self) -> &LiveValue<u8> {
        &self.values.identifier
    }

    pub fn model_name(&self) -> &LiveValue<String> {
        &self.values.model_name
    }

    pub fn hardware_version(&self) -> &LiveValue<String> {
        &self.values.hardware_version
    }

    pub fn firmware_version(&self) -> &LiveValue<String> {
        &self.values.firmware_version
    }

    pub fn max_voltage(&self) -> &LiveValue<f32> {
        &self.values.max_voltage
    }

    pub fn max_current(&self) -> &LiveValue<f32> {
        &self.values.max_current
    }

    pub fn max_ovp(&self) -> &LiveValue<f32> {
        &self.values.max_ovp
    }

    pub fn max_ocp(&self) -> &LiveValue<f32> {
        &self.values.max_ocp
    }

    pub fn max_opp(&self) -> &LiveValue<f32> {
        &self.values.max_opp
    }

    pub fn max_otp(&self) -> &LiveValue<f32> {
        &self.values.max_otp
    }

    pub fn max_lvp(&self) -> &LiveValue<f32> {
        &self.values.max_lvp
    }

    /// Default wait for [`LiveValue::query_wait`] on this device.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

impl Drop for Psu {
    fn drop(&mut self) {
        self.disconnect();
    }
}
