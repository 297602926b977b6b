//! This module contains types relevant to the PSU field data types.

use strum_macros::{EnumIter, FromRepr, IntoStaticStr};

/// Baud rates understood by the `BAUD` control frame, indexed by the byte sent on the wire.
///
/// Index 0 doubles as "no match" in [`baud_rate_index`].
pub const BAUD_RATES: [u32; 6] = [0, 9600, 19200, 38400, 57600, 115200];

/// Return the wire index of `baud_rate`, or 0 when it is not in [`BAUD_RATES`].
///
/// Because 0 is also a legitimate table entry, callers that care must check
/// the input themselves, e.g. with [`is_supported_baud_rate`].
pub fn baud_rate_index(baud_rate: u32) -> u8 {
    match BAUD_RATES.binary_search(&baud_rate) {
        Ok(index) => index as u8,
        Err(_) => 0,
    }
}

/// Whether `baud_rate` is a real (non-sentinel) entry of [`BAUD_RATES`].
pub fn is_supported_baud_rate(baud_rate: u32) -> bool {
    baud_rate != 0 && baud_rate_index(baud_rate) != 0
}

/// "Protection state" field.
#[derive(Debug, Default, EnumIter, FromRepr, IntoStaticStr, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ProtectionState {
    /// 0: No protection tripped.
    #[default]
    #[strum(serialize = "OK")]
    Ok = 0x00,
    /// 1: OVP overvoltage protection.
    #[strum(serialize = "OVP")]
    OverVoltage = 0x01,
    /// 2: OCP overcurrent protection.
    #[strum(serialize = "OCP")]
    OverCurrent = 0x02,
    /// 3: OPP over-power protection.
    #[strum(serialize = "OPP")]
    OverPower = 0x03,
    /// 4: OTP over-temperature protection.
    #[strum(serialize = "OTP")]
    OverTemperature = 0x04,
    /// 5: LVP input undervoltage protection.
    #[strum(serialize = "LVP")]
    InputUndervoltage = 0x05,
    /// 6: REP reverse connection protection.
    #[strum(serialize = "REP")]
    ReverseConnection = 0x06,
    /// Any code this table does not know, e.g. from newer firmware.
    #[strum(serialize = "UNKNOWN")]
    Unknown = 0xFF,
}

impl ProtectionState {
    /// Unknown codes map to `None` rather than a made-up state.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Like [`Self::from_u8`], but unknown codes become [`Self::Unknown`].
    pub fn from_code(value: u8) -> Self {
        Self::from_repr(value).unwrap_or(Self::Unknown)
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Represents the two possible power supply regulation modes.
#[derive(Debug, Default, EnumIter, IntoStaticStr, PartialEq, Eq, Clone, Copy)]
pub enum RegulationMode {
    /// Constant current regulation mode.
    #[strum(serialize = "CC")]
    Cc,
    /// Constant voltage regulation mode.
    #[default]
    #[strum(serialize = "CV")]
    Cv,
}

impl RegulationMode {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// The device reports CV as `1` and CC as `0`.
impl From<bool> for RegulationMode {
    fn from(cv: bool) -> Self {
        if cv { RegulationMode::Cv } else { RegulationMode::Cc }
    }
}

impl From<RegulationMode> for bool {
    fn from(value: RegulationMode) -> Self {
        matches!(value, RegulationMode::Cv)
    }
}
