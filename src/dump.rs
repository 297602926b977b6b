//! The full state dump returned for a `GET` of [`FieldCode::All`].
//!
//! The payload is a fixed, positional concatenation of other fields'
//! encodings, all little-endian:
//!
//! ```text
//! f32  input voltage
//! f32  set voltage, set current
//! f32  measured voltage, current, power
//! f32  temperature
//! f32  presets M1..M6, voltage then current each
//! f32  OVP, OCP, OPP, OTP, LVP
//! u8   brightness, volume
//! bool metering
//! f32  capacity, energy
//! bool running
//! u8   protection state
//! bool CV (1) / CC (0)
//! u8   identifier
//! f32  max voltage, max current
//! f32  max OVP, OCP, OPP, OTP, LVP
//! ```

use crate::error::ProtocolError;
use crate::field::FieldCode;
use crate::frame::Payload;
use crate::property::PropertyValue;
use crate::registry::FieldValue;
use crate::types::{ProtectionState, RegulationMode};

pub const PRESET_COUNT: usize = 6;

/// Encoded size of a dump payload in bytes.
pub const DUMP_LEN: usize = 24 * 4 + 3 + 2 * 4 + 4 + 7 * 4;

/// A voltage / current pair, as used for set points, presets and ceilings.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Va {
    pub voltage: f32,
    pub current: f32,
}

/// Measured output.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
}

/// One value per protection kind.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Protection {
    /// Volts.
    pub ovp: f32,
    /// Amps.
    pub ocp: f32,
    /// Watts.
    pub opp: f32,
    /// Celsius.
    pub otp: f32,
    /// Volts.
    pub lvp: f32,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Dump {
    pub input_voltage: f32,
    pub set: Va,
    pub measurement: Measurement,
    pub temperature: f32,
    pub presets: [Va; PRESET_COUNT],
    pub protection: Protection,
    pub brightness: u8,
    pub volume: u8,
    pub metering: bool,
    pub capacity: f32,
    pub energy: f32,
    pub running: bool,
    pub state: ProtectionState,
    pub mode: RegulationMode,
    pub identifier: u8,
    pub max_preset: Va,
    pub max_protection: Protection,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.position..self.position + N]);
        self.position += N;
        out
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    fn va(&mut self) -> Va {
        Va {
            voltage: self.f32(),
            current: self.f32(),
        }
    }

    fn protection(&mut self) -> Protection {
        Protection {
            ovp: self.f32(),
            ocp: self.f32(),
            opp: self.f32(),
            otp: self.f32(),
            lvp: self.f32(),
        }
    }
}

impl Dump {
    /// Positional decode. The length must be exactly [`DUMP_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != DUMP_LEN {
            return Err(ProtocolError::ShapeMismatch {
                field: FieldCode::All,
                found: bytes.len(),
            });
        }
        let mut cursor = Cursor { bytes, position: 0 };

        let input_voltage = cursor.f32();
        let set = cursor.va();
        let measurement = Measurement {
            voltage: cursor.f32(),
            current: cursor.f32(),
            power: cursor.f32(),
        };
        let temperature = cursor.f32();
        let mut presets = [Va::default(); PRESET_COUNT];
        for preset in presets.iter_mut() {
            *preset = cursor.va();
        }
        let protection = cursor.protection();
        let brightness = cursor.u8();
        let volume = cursor.u8();
        let metering = cursor.bool();
        let capacity = cursor.f32();
        let energy = cursor.f32();
        let running = cursor.bool();
        let state = ProtectionState::from_code(cursor.u8());
        let mode = RegulationMode::from(cursor.bool());
        let identifier = cursor.u8();
        let max_preset = cursor.va();
        let max_protection = cursor.protection();

        Ok(Dump {
            input_voltage,
            set,
            measurement,
            temperature,
            presets,
            protection,
            brightness,
            volume,
            metering,
            capacity,
            energy,
            running,
            state,
            mode,
            identifier,
            max_preset,
            max_protection,
        })
    }

    /// Encode in the device's positional layout.
    pub fn to_bytes(&self) -> Payload {
        let mut floats = vec![
            self.input_voltage,
            self.set.voltage,
            self.set.current,
            self.measurement.voltage,
            self.measurement.current,
            self.measurement.power,
            self.temperature,
        ];
        for preset in &self.presets {
            floats.extend([preset.voltage, preset.current]);
        }
        floats.extend(protection_values(&self.protection));

        let mut out = Payload::new();
        // DUMP_LEN is well below the payload capacity.
        for value in floats {
            let _ = out.extend_from_slice(&value.to_le_bytes());
        }
        let _ = out.extend_from_slice(&[self.brightness, self.volume, self.metering as u8]);
        let _ = out.extend_from_slice(&self.capacity.to_le_bytes());
        let _ = out.extend_from_slice(&self.energy.to_le_bytes());
        let _ = out.extend_from_slice(&[
            self.running as u8,
            self.state as u8,
            bool::from(self.mode) as u8,
            self.identifier,
        ]);
        let _ = out.extend_from_slice(&self.max_preset.voltage.to_le_bytes());
        let _ = out.extend_from_slice(&self.max_preset.current.to_le_bytes());
        for value in protection_values(&self.max_protection) {
            let _ = out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Expand the snapshot into the individual field values it carries.
    ///
    /// Lets a dump be applied through the same routing as single field reports.
    pub fn fields(&self) -> Vec<(FieldCode, FieldValue)> {
        use FieldCode as F;

        let float = |value: f32| FieldValue::Scalar(PropertyValue::Float(value));
        let uint = |value: u8| FieldValue::Scalar(PropertyValue::Uint(value as u32));
        let flag = |value: bool| FieldValue::Scalar(PropertyValue::Uint(value as u32));

        let mut fields = vec![
            (F::InputVoltage, float(self.input_voltage)),
            (F::VSet, float(self.set.voltage)),
            (F::ISet, float(self.set.current)),
            (F::Measurement, FieldValue::Triple(self.measurement)),
            (F::Temperature, float(self.temperature)),
        ];
        for (index, preset) in self.presets.iter().enumerate() {
            if let Some((voltage, current)) = F::preset(index) {
                fields.push((voltage, float(preset.voltage)));
                fields.push((current, float(preset.current)));
            }
        }
        let protection = [F::Ovp, F::Ocp, F::Opp, F::Otp, F::Lvp];
        for (field, value) in protection.into_iter().zip(protection_values(&self.protection)) {
            fields.push((field, float(value)));
        }
        fields.extend([
            (F::Brightness, uint(self.brightness)),
            (F::Volume, uint(self.volume)),
            (F::Metering, flag(self.metering)),
            (F::Capacity, float(self.capacity)),
            (F::Energy, float(self.energy)),
            (F::Running, flag(self.running)),
            (F::Protection, uint(self.state as u8)),
            (F::CvCc, flag(self.mode.into())),
            (F::Identifier, uint(self.identifier)),
            (F::MaxVoltage, float(self.max_preset.voltage)),
            (F::MaxCurrent, float(self.max_preset.current)),
        ]);
        let ceilings = [F::MaxOvp, F::MaxOcp, F::MaxOpp, F::MaxOtp, F::MaxLvp];
        for (field, value) in ceilings.into_iter().zip(protection_values(&self.max_protection)) {
            fields.push((field, float(value)));
        }
        fields
    }
}

fn protection_values(protection: &Protection) -> [f32; 5] {
    [
        protection.ovp,
        protection.ocp,
        protection.opp,
        protection.otp,
        protection.lvp,
    ]
}

#[cfg(test)]
pub(crate) fn sample_dump() -> Dump {
    let mut presets = [Va::default(); PRESET_COUNT];
    for (index, preset) in presets.iter_mut().enumerate() {
        preset.voltage = 3.3 + index as f32;
        preset.current = 0.5 + index as f32 / 10.0;
    }
    Dump {
        input_voltage: 20.1,
        set: Va {
            voltage: 5.0,
            current: 1.0,
        },
        measurement: Measurement {
            voltage: 4.99,
            current: 0.25,
            power: 1.2475,
        },
        temperature: 27.5,
        presets,
        protection: Protection {
            ovp: 30.0,
            ocp: 5.1,
            opp: 150.0,
            otp: 80.0,
            lvp: 10.0,
        },
        brightness: 10,
        volume: 3,
        metering: true,
        capacity: 0.125,
        energy: 0.625,
        running: true,
        state: ProtectionState::Ok,
        mode: RegulationMode::Cv,
        identifier: 7,
        max_preset: Va {
            voltage: 19.9,
            current: 5.1,
        },
        max_protection: Protection {
            ovp: 30.0,
            ocp: 5.1,
            opp: 150.0,
            otp: 99.0,
            lvp: 30.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_len_matches_layout() {
        assert_eq!(DUMP_LEN, 139);
        assert_eq!(sample_dump().to_bytes().len(), DUMP_LEN);
    }

    #[test]
    fn dump_positional_layout() {
        let dump = sample_dump();
        let bytes = dump.to_bytes();
        assert_eq!(&bytes[0..4], &20.1f32.to_le_bytes());
        // Preset M1 voltage follows the 7 leading floats.
        assert_eq!(&bytes[28..32], &3.3f32.to_le_bytes());
        // Brightness, volume, metering come straight after the 24 floats.
        assert_eq!(&bytes[96..99], &[10, 3, 1]);
        // Running, state, CV flag, identifier.
        assert_eq!(&bytes[107..111], &[1, 0, 1, 7]);
        assert_eq!(&bytes[135..139], &30.0f32.to_le_bytes());

        assert_eq!(Dump::from_bytes(&bytes).unwrap(), dump);
    }

    #[test]
    fn dump_rejects_wrong_length() {
        let bytes = sample_dump().to_bytes();
        assert!(matches!(
            Dump::from_bytes(&bytes[..DUMP_LEN - 1]),
            Err(ProtocolError::ShapeMismatch { field: FieldCode::All, found: 138 })
        ));
    }

    #[test]
    fn dump_keeps_unknown_protection_state() {
        let mut bytes = sample_dump().to_bytes();
        bytes[108] = 42;
        let dump = Dump::from_bytes(&bytes).unwrap();
        assert_eq!(dump.state, ProtectionState::Unknown);
        assert_eq!(dump.identifier, 7);
        assert_eq!(dump.set, sample_dump().set);
    }

    #[test]
    fn dump_expands_to_every_readable_field() {
        let fields = sample_dump().fields();
        // Everything but the control placeholder, the three strings and ALL itself.
        assert_eq!(fields.len(), 38);
        assert!(fields.contains(&(FieldCode::M6Current, FieldValue::Scalar(PropertyValue::Float(1.0)))));
        assert!(fields.contains(&(FieldCode::CvCc, FieldValue::Scalar(PropertyValue::Uint(1)))));
        assert!(fields.contains(&(FieldCode::Identifier, FieldValue::Scalar(PropertyValue::Uint(7)))));
    }
}
