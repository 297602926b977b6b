//! Typed property values and the descriptors that bound them.
//!
//! A [`PropertyDescriptor`] states the legal domain of a property, separately
//! from whatever value it currently holds. Descriptors are used both for the
//! live device properties and for a connector's connection-time settings.

use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::types::{ProtectionState, RegulationMode};

/// Scalar types a property can carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScalarType {
    Uint,
    Float,
    Text,
}

impl ScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Uint => "unsigned integer",
            ScalarType::Float => "float",
            ScalarType::Text => "string",
        }
    }
}

/// A property value. Semantics come from the owning descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Uint(u32),
    Float(f32),
    Text(String),
}

impl PropertyValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            PropertyValue::Uint(_) => ScalarType::Uint,
            PropertyValue::Float(_) => ScalarType::Float,
            PropertyValue::Text(_) => ScalarType::Text,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            PropertyValue::Uint(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PropertyValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl core::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PropertyValue::Uint(value) => write!(f, "{value}"),
            PropertyValue::Float(value) => write!(f, "{value}"),
            PropertyValue::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Legal domain of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor {
    /// Any value of the given type.
    Scalar(ScalarType),
    /// One of a fixed set of named values.
    Enumerated(Vec<(String, PropertyValue)>),
    /// Inclusive unsigned range.
    UintRange { min: u32, max: u32 },
    /// Inclusive float range.
    FloatRange { min: f32, max: f32 },
}

impl PropertyDescriptor {
    /// Build an enumeration from `(name, value)` pairs.
    pub fn enumeration<'a>(entries: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        PropertyDescriptor::Enumerated(
            entries
                .into_iter()
                .map(|(name, value)| (name.to_string(), PropertyValue::Uint(value)))
                .collect(),
        )
    }

    /// Off / on enumeration used for boolean fields.
    pub fn flag() -> Self {
        Self::enumeration([("off", 0), ("on", 1)])
    }

    /// Check `value` against this domain.
    pub fn validate(&self, value: &PropertyValue) -> Result<(), ValidationError> {
        match (self, value) {
            (PropertyDescriptor::Scalar(expected), value) => {
                if value.scalar_type() == *expected {
                    Ok(())
                } else {
                    Err(ValidationError::WrongType {
                        expected: expected.name(),
                    })
                }
            }
            (PropertyDescriptor::Enumerated(entries), value) => {
                if entries.iter().any(|(_, member)| member == value) {
                    Ok(())
                } else {
                    Err(ValidationError::NotInEnumeration)
                }
            }
            (PropertyDescriptor::UintRange { min, max }, PropertyValue::Uint(value)) => {
                if (*min..=*max).contains(value) {
                    Ok(())
                } else {
                    Err(ValidationError::OutOfRange {
                        value: *value as f64,
                        min: *min as f64,
                        max: *max as f64,
                    })
                }
            }
            (PropertyDescriptor::FloatRange { min, max }, PropertyValue::Float(value)) => {
                // NaN fails both comparisons and is rejected here.
                if *value >= *min && *value <= *max {
                    Ok(())
                } else {
                    Err(ValidationError::OutOfRange {
                        value: *value as f64,
                        min: *min as f64,
                        max: *max as f64,
                    })
                }
            }
            (PropertyDescriptor::UintRange { .. }, _) => Err(ValidationError::WrongType {
                expected: ScalarType::Uint.name(),
            }),
            (PropertyDescriptor::FloatRange { .. }, _) => Err(ValidationError::WrongType {
                expected: ScalarType::Float.name(),
            }),
        }
    }

    /// Look up an enumeration member by name.
    pub fn member(&self, name: &str) -> Option<&PropertyValue> {
        match self {
            PropertyDescriptor::Enumerated(entries) => entries
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

/// Named property values, e.g. the settings passed to a connector.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Named descriptors, in presentation order.
pub type PropertyDescriptors = Vec<(String, PropertyDescriptor)>;

/// Conversion between a typed Rust value and its [`PropertyValue`] form.
pub trait PropertyType: Clone + Send + Sync + 'static {
    fn to_property(&self) -> PropertyValue;
    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl PropertyType for PropertyValue {
    fn to_property(&self) -> PropertyValue {
        self.clone()
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl PropertyType for f32 {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Float(*self)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_float()
    }
}

impl PropertyType for u32 {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(*self)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_uint()
    }
}

impl PropertyType for u8 {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(*self as u32)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_uint().and_then(|value| u8::try_from(value).ok())
    }
}

impl PropertyType for bool {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(*self as u32)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_uint().map(|value| value != 0)
    }
}

impl PropertyType for String {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Text(self.clone())
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl PropertyType for ProtectionState {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(*self as u32)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        let raw = u8::try_from(value.as_uint()?).ok()?;
        Some(ProtectionState::from_code(raw))
    }
}

impl PropertyType for RegulationMode {
    fn to_property(&self) -> PropertyValue {
        PropertyValue::Uint(bool::from(*self) as u32)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        bool::from_property(value).map(RegulationMode::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_range_validation() {
        let descriptor = PropertyDescriptor::FloatRange { min: 0.0, max: 30.0 };
        assert!(descriptor.validate(&PropertyValue::Float(0.0)).is_ok());
        assert!(descriptor.validate(&PropertyValue::Float(30.0)).is_ok());
        assert!(matches!(
            descriptor.validate(&PropertyValue::Float(30.5)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(descriptor.validate(&PropertyValue::Float(f32::NAN)).is_err());
        assert_eq!(
            descriptor.validate(&PropertyValue::Uint(3)),
            Err(ValidationError::WrongType { expected: "float" })
        );
    }

    #[test]
    fn uint_range_validation() {
        let descriptor = PropertyDescriptor::UintRange { min: 1, max: 14 };
        assert!(descriptor.validate(&PropertyValue::Uint(1)).is_ok());
        assert!(descriptor.validate(&PropertyValue::Uint(14)).is_ok());
        assert!(descriptor.validate(&PropertyValue::Uint(0)).is_err());
        assert!(descriptor.validate(&PropertyValue::Uint(15)).is_err());
    }

    #[test]
    fn enumeration_validation() {
        let descriptor = PropertyDescriptor::enumeration([("CC", 0), ("CV", 1)]);
        assert!(descriptor.validate(&PropertyValue::Uint(1)).is_ok());
        assert_eq!(
            descriptor.validate(&PropertyValue::Uint(2)),
            Err(ValidationError::NotInEnumeration)
        );
        assert_eq!(descriptor.member("CV"), Some(&PropertyValue::Uint(1)));
        assert_eq!(descriptor.member("XX"), None);
    }

    #[test]
    fn scalar_validation() {
        let descriptor = PropertyDescriptor::Scalar(ScalarType::Text);
        assert!(descriptor.validate(&PropertyValue::Text("DPS-150".into())).is_ok());
        assert!(descriptor.validate(&PropertyValue::Float(1.0)).is_err());
    }

    #[test]
    fn typed_conversions() {
        assert_eq!(true.to_property(), PropertyValue::Uint(1));
        assert_eq!(bool::from_property(&PropertyValue::Uint(0)), Some(false));
        assert_eq!(u8::from_property(&PropertyValue::Uint(300)), None);
        assert_eq!(
            ProtectionState::from_property(&PropertyValue::Uint(2)),
            Some(ProtectionState::OverCurrent)
        );
        assert_eq!(
            ProtectionState::from_property(&PropertyValue::Uint(9)),
            Some(ProtectionState::Unknown)
        );
        assert_eq!(ProtectionState::from_property(&PropertyValue::Uint(300)), None);
        assert_eq!(
            RegulationMode::from_property(&PropertyValue::Uint(0)),
            Some(RegulationMode::Cc)
        );
        assert_eq!(f32::from_property(&PropertyValue::Text("x".into())), None);
    }
}
