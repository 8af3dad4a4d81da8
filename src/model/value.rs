//! Tagged-union value type for heterogeneous IFC property/quantity data.
//!
//! IFC property-set and quantity-set values are heterogeneous: numbers,
//! strings, enumerations, booleans. Per the design notes this is modelled
//! as an explicit sum type at the boundary rather than relying on runtime
//! polymorphism — a resolution that lands on a variant the comparator can't
//! use yields `UNABLE`, never a type error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One value pulled from an IFC property set, quantity set, attribute, rule
/// parameter bag, or rule literal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Boolean(bool),
    Enum(String),
}

impl PropertyValue {
    /// View this value as `f64` if the variant is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Whether this value has a numeric representation.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Number(_) | PropertyValue::Integer(_))
    }

    /// Equality used by the `=`/`!=` comparators: works across any
    /// comparable pair, never fails with a type error (an incompatible pair
    /// is simply unequal).
    pub fn loosely_equals(&self, other: &PropertyValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return (a - b).abs() < 1e-6;
        }
        match (self, other) {
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
            (PropertyValue::Enum(a), PropertyValue::Enum(b)) => a == b,
            (PropertyValue::Text(a), PropertyValue::Enum(b))
            | (PropertyValue::Enum(a), PropertyValue::Text(b)) => a == b,
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Text(s) => write!(f, "{s}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Enum(s) => write!(f, "{s}"),
        }
    }
}

/// A unit of measure attached to a numeric value. Only the units the
/// extraction layer normalizes to are represented; `evaluate` treats any
/// mismatch between LHS/RHS units as `UNABLE` rather than silently
/// comparing across units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Millimetre,
    Metre,
    SquareMetre,
    Degree,
    Count,
    Dimensionless,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Millimetre => "mm",
            Unit::Metre => "m",
            Unit::SquareMetre => "m2",
            Unit::Degree => "deg",
            Unit::Count => "count",
            Unit::Dimensionless => "",
        };
        write!(f, "{s}")
    }
}

impl Unit {
    /// Conversion factor to this unit's base representation (millimetres
    /// for lengths, square metres for areas). Used by the extraction layer
    /// when a source quantity is declared in a different unit than the
    /// target field.
    pub fn to_base_factor(self) -> f64 {
        match self {
            Unit::Millimetre => 1.0,
            Unit::Metre => 1000.0,
            Unit::SquareMetre => 1.0,
            Unit::Degree => 1.0,
            Unit::Count => 1.0,
            Unit::Dimensionless => 1.0,
        }
    }
}
