//! Closed, per-element property tables.
//!
//! Each element keeps its configuration in a plain settings struct with typed
//! accessors. [`PropertyTable`] is the small generic layer on top, for tools
//! that need to enumerate and set properties by name.

use std::fmt;

use crate::caps::Caps;
use crate::error::PropertyError;

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// String or enum nick.
    Str(String),
    /// Caps.
    Caps(Caps),
}

impl PropValue {
    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer payload, accepting either signedness when representable.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            PropValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Unsigned payload, accepting non-negative signed values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropValue::UInt(v) => Some(*v),
            PropValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Caps payload.
    pub fn as_caps(&self) -> Option<&Caps> {
        match self {
            PropValue::Caps(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::UInt(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
            PropValue::Caps(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(i64::from(v))
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<u64> for PropValue {
    fn from(v: u64) -> Self {
        PropValue::UInt(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v)
    }
}

impl From<Caps> for PropValue {
    fn from(v: Caps) -> Self {
        PropValue::Caps(v)
    }
}

/// Value type and bounds of a property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyKind {
    /// Boolean.
    Bool,
    /// Signed integer within bounds.
    Int {
        /// Minimum.
        min: i64,
        /// Maximum.
        max: i64,
    },
    /// Unsigned integer within bounds.
    UInt {
        /// Minimum.
        min: u64,
        /// Maximum.
        max: u64,
    },
    /// Free-form string.
    Str,
    /// One of a closed set of nicks.
    Enum(&'static [&'static str]),
    /// Caps.
    Caps,
}

/// Description of one property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertySpec {
    /// Property name, e.g. `max-size-buffers`.
    pub name: &'static str,
    /// Short description.
    pub blurb: &'static str,
    /// Value type.
    pub kind: PropertyKind,
    /// Whether the property can be set.
    pub writable: bool,
}

impl PropertySpec {
    /// A writable property.
    pub const fn new(name: &'static str, blurb: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            blurb,
            kind,
            writable: true,
        }
    }

    /// A read-only property.
    pub const fn read_only(name: &'static str, blurb: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            blurb,
            kind,
            writable: false,
        }
    }

    /// Validate `value` and convert it to this property's canonical type.
    pub fn coerce(&self, value: PropValue) -> Result<PropValue, PropertyError> {
        if !self.writable {
            return Err(PropertyError::ReadOnly(self.name.to_owned()));
        }
        let wrong_type = |expected| PropertyError::WrongType {
            name: self.name.to_owned(),
            expected,
        };
        let out_of_range = || PropertyError::OutOfRange(self.name.to_owned());
        match self.kind {
            PropertyKind::Bool => value.as_bool().map(PropValue::Bool).ok_or_else(|| wrong_type("bool")),
            PropertyKind::Int { min, max } => {
                let v = value.as_i64().ok_or_else(|| wrong_type("int"))?;
                if (min..=max).contains(&v) {
                    Ok(PropValue::Int(v))
                } else {
                    Err(out_of_range())
                }
            }
            PropertyKind::UInt { min, max } => {
                let v = value.as_u64().ok_or_else(|| match &value {
                    PropValue::Int(_) => out_of_range(),
                    _ => wrong_type("uint"),
                })?;
                if (min..=max).contains(&v) {
                    Ok(PropValue::UInt(v))
                } else {
                    Err(out_of_range())
                }
            }
            PropertyKind::Str => match value {
                PropValue::Str(s) => Ok(PropValue::Str(s)),
                _ => Err(wrong_type("string")),
            },
            PropertyKind::Enum(nicks) => match value {
                PropValue::Str(s) if nicks.contains(&s.as_str()) => Ok(PropValue::Str(s)),
                PropValue::Str(_) => Err(out_of_range()),
                _ => Err(wrong_type("enum")),
            },
            PropertyKind::Caps => match value {
                PropValue::Caps(c) => Ok(PropValue::Caps(c)),
                _ => Err(wrong_type("caps")),
            },
        }
    }
}

/// Generic, by-name access to an element's settings.
pub trait PropertyTable: Send + Sync {
    /// All properties, in display order.
    fn property_specs(&self) -> &'static [PropertySpec];

    /// Apply an already validated value.
    fn apply_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError>;

    /// Read a property.
    fn property(&self, name: &str) -> Result<PropValue, PropertyError>;

    /// Look up a property description.
    fn find_property(&self, name: &str) -> Option<&'static PropertySpec> {
        self.property_specs().iter().find(|spec| spec.name == name)
    }

    /// Validate and set a property.
    fn set_property(&self, name: &str, value: PropValue) -> Result<(), PropertyError> {
        let spec = self
            .find_property(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_owned()))?;
        let value = spec.coerce(value)?;
        self.apply_property(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_integers() {
        let spec = PropertySpec::new("num", "count", PropertyKind::UInt { min: 0, max: 10 });
        assert_eq!(spec.coerce(PropValue::from(3)), Ok(PropValue::UInt(3)));
        assert_eq!(
            spec.coerce(PropValue::from(-1)),
            Err(PropertyError::OutOfRange("num".into()))
        );
        assert_eq!(
            spec.coerce(PropValue::from(11u64)),
            Err(PropertyError::OutOfRange("num".into()))
        );
        assert!(matches!(
            spec.coerce(PropValue::from("x")),
            Err(PropertyError::WrongType { .. })
        ));
    }

    #[test]
    fn test_coerce_enum_and_read_only() {
        let spec = PropertySpec::new("leaky", "mode", PropertyKind::Enum(&["no", "upstream"]));
        assert!(spec.coerce(PropValue::from("upstream")).is_ok());
        assert_eq!(
            spec.coerce(PropValue::from("sideways")),
            Err(PropertyError::OutOfRange("leaky".into()))
        );

        let ro = PropertySpec::read_only("count", "seen", PropertyKind::UInt { min: 0, max: u64::MAX });
        assert_eq!(
            ro.coerce(PropValue::from(1u64)),
            Err(PropertyError::ReadOnly("count".into()))
        );
    }
}
