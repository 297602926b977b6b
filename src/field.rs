//! This module is used to define the protocol fields of the DPS PSUs.
//!
//! Every addressable datum on the device has a one byte field code. The
//! code fixes both the payload shape on the wire and whether the host may
//! write it.

use strum_macros::{EnumIter, FromRepr, IntoStaticStr};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum FieldCode {
    /// Placeholder field used by `BAUD` and `LOCK` control frames.
    ///
    /// Payload is a single byte.
    None = 0x00,
    /// __R__ - Input voltage. Float32, volts.
    InputVoltage = 0xC0,
    /// __R/W__ - Voltage setting. Float32, volts.
    VSet = 0xC1,
    /// __R/W__ - Current setting. Float32, amps.
    ISet = 0xC2,
    /// __R__ - Output measurement.
    ///
    /// Three Float32: voltage (V), current (A), power (W).
    Measurement = 0xC3,
    /// __R__ - Internal temperature. Float32, Celsius.
    Temperature = 0xC4,
    /// __R/W__ - Preset M1 voltage. Float32, volts.
    M1Voltage = 0xC5,
    /// __R/W__ - Preset M1 current. Float32, amps.
    M1Current = 0xC6,
    M2Voltage = 0xC7,
    M2Current = 0xC8,
    M3Voltage = 0xC9,
    M3Current = 0xCA,
    M4Voltage = 0xCB,
    M4Current = 0xCC,
    M5Voltage = 0xCD,
    M5Current = 0xCE,
    M6Voltage = 0xCF,
    M6Current = 0xD0,
    /// __R/W__ - Over voltage protection. Float32, volts.
    Ovp = 0xD1,
    /// __R/W__ - Over current protection. Float32, amps.
    Ocp = 0xD2,
    /// __R/W__ - Over power protection. Float32, watts.
    Opp = 0xD3,
    /// __R/W__ - Over temperature protection. Float32, Celsius.
    Otp = 0xD4,
    /// __R/W__ - Low (input) voltage protection. Float32, volts.
    Lvp = 0xD5,
    /// __R/W__ - Display brightness.
    ///
    /// Range = 1-14. 1 is darkest, and 14 is the brightest.
    Brightness = 0xD6,
    /// __R/W__ - Buzzer volume.
    ///
    /// Range = 0-15. 0 is mute.
    Volume = 0xD7,
    /// __R/W__ - Capacity and energy metering.
    /// * `0` - Stopped.
    /// * `1` - Accumulating.
    Metering = 0xD8,
    /// __R__ - Accumulated capacity. Float32, amp-hours.
    Capacity = 0xD9,
    /// __R__ - Accumulated energy. Float32, watt-hours.
    Energy = 0xDA,
    /// __R/W__ - Switched output.
    /// * `0` - Stopped.
    /// * `1` - Running.
    Running = 0xDB,
    /// __R__ - Protection state.
    ///
    /// See [`ProtectionState`](crate::types::ProtectionState).
    Protection = 0xDC,
    /// __R__ - Constant voltage constant current state.
    /// * `0` - CC.
    /// * `1` - CV.
    ///
    /// See [`RegulationMode`](crate::types::RegulationMode).
    CvCc = 0xDD,
    /// __R__ - Model name, e.g. `DPS-150`. String.
    ModelName = 0xDE,
    /// __R__ - Hardware version, e.g. `V1.0`. String.
    HardwareVersion = 0xDF,
    /// __R__ - Firmware version, e.g. `V1.2`. String.
    FirmwareVersion = 0xE0,
    /// __R/W__ - Device identifier, range 0-30.
    ///
    /// Can be changed in the device settings to tell several units apart.
    Identifier = 0xE1,
    /// __R__ - Highest voltage setting available right now (input minus headroom). Float32.
    MaxVoltage = 0xE2,
    /// __R__ - Highest current setting. Float32.
    MaxCurrent = 0xE3,
    /// __R__ - Ceiling for OVP (30V). Float32.
    MaxOvp = 0xE4,
    /// __R__ - Ceiling for OCP (5.1A). Float32.
    MaxOcp = 0xE5,
    /// __R__ - Ceiling for OPP (150W). Float32.
    MaxOpp = 0xE6,
    /// __R__ - Ceiling for OTP (99C). Float32.
    MaxOtp = 0xE7,
    /// __R__ - Ceiling for LVP (30V). Float32.
    MaxLvp = 0xE8,
    /// __R__ - Full state dump.
    ///
    /// See [`Dump`](crate::dump::Dump) for the positional layout.
    All = 0xFF,
}

/// How a field's payload is laid out on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    /// Little-endian IEEE-754 single.
    Float32,
    /// Voltage, current, power, three Float32.
    Float32Triple,
    Uint8,
    /// One byte, zero is false.
    Bool,
    /// UTF-8 text spanning the whole payload. The frame length byte is the prefix.
    Text,
    /// Concatenation of other fields, see [`Dump`](crate::dump::Dump).
    Dump,
}

impl PayloadShape {
    /// Fixed payload size in bytes, `None` for variable length shapes.
    pub const fn fixed_len(&self) -> Option<usize> {
        match self {
            PayloadShape::Float32 => Some(4),
            PayloadShape::Float32Triple => Some(12),
            PayloadShape::Uint8 | PayloadShape::Bool => Some(1),
            PayloadShape::Text => None,
            PayloadShape::Dump => Some(crate::dump::DUMP_LEN),
        }
    }
}

/// Whether the host may change a field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl FieldCode {
    /// Payload shape of this field.
    pub const fn shape(&self) -> PayloadShape {
        use FieldCode as F;
        match self {
            F::None => PayloadShape::Uint8,
            F::Measurement => PayloadShape::Float32Triple,
            F::Brightness | F::Volume | F::Protection | F::Identifier => PayloadShape::Uint8,
            F::Metering | F::Running | F::CvCc => PayloadShape::Bool,
            F::ModelName | F::HardwareVersion | F::FirmwareVersion => PayloadShape::Text,
            F::All => PayloadShape::Dump,
            _ => PayloadShape::Float32,
        }
    }

    /// Access class of this field.
    pub const fn access(&self) -> Access {
        use FieldCode as F;
        match self {
            F::VSet | F::ISet => Access::ReadWrite,
            F::M1Voltage | F::M1Current | F::M2Voltage | F::M2Current | F::M3Voltage => {
                Access::ReadWrite
            }
            F::M3Current | F::M4Voltage | F::M4Current | F::M5Voltage | F::M5Current => {
                Access::ReadWrite
            }
            F::M6Voltage | F::M6Current => Access::ReadWrite,
            F::Ovp | F::Ocp | F::Opp | F::Otp | F::Lvp => Access::ReadWrite,
            F::Brightness | F::Volume | F::Metering | F::Running | F::Identifier => {
                Access::ReadWrite
            }
            _ => Access::ReadOnly,
        }
    }

    /// Preset voltage and current fields for preset `index` (0 - 5).
    pub fn preset(index: usize) -> Option<(FieldCode, FieldCode)> {
        if index >= crate::dump::PRESET_COUNT {
            return None;
        }
        let base = FieldCode::M1Voltage as u8 + (index as u8) * 2;
        Some((FieldCode::from_repr(base)?, FieldCode::from_repr(base + 1)?))
    }

    /// Property name used in descriptor tables and logs.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl From<FieldCode> for u8 {
    fn from(value: FieldCode) -> Self {
        value as u8
    }
}

impl core::fmt::Display for FieldCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({:#04x})", self.name(), *self as u8)
    }
}
