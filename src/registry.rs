//! Field registry: turns payload bytes into typed values and back, driven by
//! each field's [`PayloadShape`].

use crate::dump::{Dump, Measurement};
use crate::error::ProtocolError;
use crate::field::{FieldCode, PayloadShape};
use crate::frame::Payload;
use crate::property::PropertyValue;

/// A decoded field payload.
///
/// Single valued fields decode to [`FieldValue::Scalar`]; the composite
/// shapes are kept together here and fanned out into several properties by
/// the device layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(PropertyValue),
    Triple(Measurement),
    Dump(Box<Dump>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&PropertyValue> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

impl From<PropertyValue> for FieldValue {
    fn from(value: PropertyValue) -> Self {
        FieldValue::Scalar(value)
    }
}

fn check_len(field: FieldCode, bytes: &[u8]) -> Result<(), ProtocolError> {
    match field.shape().fixed_len() {
        Some(len) if len != bytes.len() => Err(ProtocolError::ShapeMismatch {
            field,
            found: bytes.len(),
        }),
        _ => Ok(()),
    }
}

fn f32_at(bytes: &[u8], index: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    f32::from_le_bytes(raw)
}

/// Decode the payload of `field`.
pub fn decode_payload(field: FieldCode, bytes: &[u8]) -> Result<FieldValue, ProtocolError> {
    check_len(field, bytes)?;
    let value = match field.shape() {
        PayloadShape::Float32 => FieldValue::Scalar(PropertyValue::Float(f32_at(bytes, 0))),
        PayloadShape::Float32Triple => FieldValue::Triple(Measurement {
            voltage: f32_at(bytes, 0),
            current: f32_at(bytes, 1),
            power: f32_at(bytes, 2),
        }),
        PayloadShape::Uint8 => FieldValue::Scalar(PropertyValue::Uint(bytes[0] as u32)),
        PayloadShape::Bool => FieldValue::Scalar(PropertyValue::Uint((bytes[0] != 0) as u32)),
        PayloadShape::Text => {
            let text = core::str::from_utf8(bytes).map_err(|_| ProtocolError::ShapeMismatch {
                field,
                found: bytes.len(),
            })?;
            // The device pads some strings with NULs.
            FieldValue::Scalar(PropertyValue::Text(text.trim_end_matches('\0').to_string()))
        }
        PayloadShape::Dump => FieldValue::Dump(Box::new(Dump::from_bytes(bytes)?)),
    };
    Ok(value)
}

/// Decode a raw field byte and its payload, rejecting undocumented codes.
pub fn decode_raw(field: u8, bytes: &[u8]) -> Result<(FieldCode, FieldValue), ProtocolError> {
    let field = FieldCode::from_repr(field).ok_or(ProtocolError::UnknownField(field))?;
    Ok((field, decode_payload(field, bytes)?))
}

/// Encode `value` as the payload of `field`.
pub fn encode_payload(field: FieldCode, value: &FieldValue) -> Result<Payload, ProtocolError> {
    let mismatch = |found| ProtocolError::ShapeMismatch { field, found };
    let mut out = Payload::new();
    match (field.shape(), value) {
        (PayloadShape::Float32, FieldValue::Scalar(PropertyValue::Float(value))) => {
            push_f32s(&mut out, &[*value]);
        }
        (PayloadShape::Float32Triple, FieldValue::Triple(m)) => {
            push_f32s(&mut out, &[m.voltage, m.current, m.power]);
        }
        (PayloadShape::Uint8, FieldValue::Scalar(PropertyValue::Uint(value))) => {
            let byte = u8::try_from(*value).map_err(|_| mismatch(4))?;
            let _ = out.push(byte);
        }
        (PayloadShape::Bool, FieldValue::Scalar(PropertyValue::Uint(value))) => match value {
            0 | 1 => {
                let _ = out.push(*value as u8);
            }
            _ => return Err(mismatch(4)),
        },
        (PayloadShape::Text, FieldValue::Scalar(PropertyValue::Text(text))) => {
            out = Payload::from_slice(text.as_bytes())
                .map_err(|_| ProtocolError::PayloadTooLong(text.len()))?;
        }
        (PayloadShape::Dump, FieldValue::Dump(dump)) => out = dump.to_bytes(),
        (_, value) => return Err(mismatch(encoded_width(value))),
    }
    Ok(out)
}

/// Natural width of a value that did not match the expected shape, for error reporting.
fn encoded_width(value: &FieldValue) -> usize {
    match value {
        FieldValue::Scalar(PropertyValue::Uint(_)) => 1,
        FieldValue::Scalar(PropertyValue::Float(_)) => 4,
        FieldValue::Scalar(PropertyValue::Text(text)) => text.len(),
        FieldValue::Triple(_) => 12,
        FieldValue::Dump(_) => crate::dump::DUMP_LEN,
    }
}

fn push_f32s(out: &mut Payload, values: &[f32]) {
    for value in values {
        // At most 12 bytes, always fits.
        let _ = out.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::sample_dump;
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    /// A representative in-shape value for every field.
    fn sample_value(field: FieldCode) -> FieldValue {
        match field.shape() {
            PayloadShape::Float32 => PropertyValue::Float(12.345).into(),
            PayloadShape::Float32Triple => FieldValue::Triple(Measurement {
                voltage: 5.0,
                current: 0.5,
                power: 2.5,
            }),
            PayloadShape::Uint8 => PropertyValue::Uint(6).into(),
            PayloadShape::Bool => PropertyValue::Uint(1).into(),
            PayloadShape::Text => PropertyValue::Text("DPS-150".into()).into(),
            PayloadShape::Dump => FieldValue::Dump(Box::new(sample_dump())),
        }
    }

    #[test]
    fn every_field_round_trips() {
        for field in FieldCode::iter() {
            let value = sample_value(field);
            let bytes = encode_payload(field, &value).unwrap();
            assert_eq!(decode_payload(field, &bytes).unwrap(), value, "{field}");
        }
    }

    #[test]
    fn wrong_length_is_shape_mismatch() {
        assert_eq!(
            decode_payload(FieldCode::VSet, &[0, 0, 0]),
            Err(ProtocolError::ShapeMismatch {
                field: FieldCode::VSet,
                found: 3
            })
        );
        assert_eq!(
            decode_payload(FieldCode::Brightness, &[1, 2]),
            Err(ProtocolError::ShapeMismatch {
                field: FieldCode::Brightness,
                found: 2
            })
        );
        assert!(decode_payload(FieldCode::Measurement, &[0; 8]).is_err());
        assert!(decode_payload(FieldCode::All, &[0; 10]).is_err());
    }

    #[test]
    fn unknown_field_rejected() {
        assert_eq!(decode_raw(0x42, &[1]), Err(ProtocolError::UnknownField(0x42)));
        assert_eq!(
            decode_raw(0xD7, &[9]),
            Ok((FieldCode::Volume, PropertyValue::Uint(9).into()))
        );
    }

    #[test]
    fn wrong_value_type_rejected() {
        assert!(encode_payload(FieldCode::VSet, &PropertyValue::Uint(5).into()).is_err());
        assert!(encode_payload(FieldCode::Brightness, &PropertyValue::Uint(256).into()).is_err());
        assert!(encode_payload(FieldCode::Running, &PropertyValue::Uint(2).into()).is_err());
        assert!(encode_payload(FieldCode::ModelName, &PropertyValue::Float(1.0).into()).is_err());
    }

    #[test]
    fn float_payload_is_little_endian() {
        let bytes = encode_payload(FieldCode::VSet, &PropertyValue::Float(1.0).into()).unwrap();
        assert_eq!(bytes.as_slice(), &[0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn bool_decode_accepts_any_nonzero() {
        assert_eq!(
            decode_payload(FieldCode::Metering, &[0x05]).unwrap(),
            PropertyValue::Uint(1).into()
        );
    }

    #[test]
    fn text_strips_trailing_nul() {
        assert_eq!(
            decode_payload(FieldCode::FirmwareVersion, b"V1.2\0\0").unwrap(),
            PropertyValue::Text("V1.2".into()).into()
        );
        assert!(decode_payload(FieldCode::ModelName, &[0xFF, 0xFE]).is_err());
    }

    proptest! {
        #[test]
        fn float_fields_round_trip(value in any::<f32>().prop_filter("NaN never compares equal", |v| !v.is_nan())) {
            let encoded = encode_payload(FieldCode::Ovp, &PropertyValue::Float(value).into()).unwrap();
            prop_assert_eq!(decode_payload(FieldCode::Ovp, &encoded).unwrap(), PropertyValue::Float(value).into());
        }

        #[test]
        fn uint8_fields_round_trip(value in any::<u8>()) {
            let value: FieldValue = PropertyValue::Uint(value as u32).into();
            let encoded = encode_payload(FieldCode::Identifier, &value).unwrap();
            prop_assert_eq!(decode_payload(FieldCode::Identifier, &encoded).unwrap(), value);
        }

        #[test]
        fn text_fields_round_trip(text in "[ -~]{0,64}") {
            // Trailing NULs are stripped on decode, printable ASCII has none.
            let value: FieldValue = PropertyValue::Text(text).into();
            let encoded = encode_payload(FieldCode::HardwareVersion, &value).unwrap();
            prop_assert_eq!(decode_payload(FieldCode::HardwareVersion, &encoded).unwrap(), value);
        }
    }
}
