//! Guest-side values and the string coercion table.
//!
//! Everything arriving from the controller is text. [`coerce`] turns that
//! text into a [`GuestValue`] of the type a field or parameter declares.

use std::fmt;
use std::sync::Arc;

use super::object::{GuestObject, ScriptError};

/// Declared type of a scriptable field or method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Str,
    /// Any value; controller text is passed through as a string.
    Object,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Str => "string",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A value living on the guest side of the bridge.
#[derive(Clone)]
pub enum GuestValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Object(GuestObject),
}

impl GuestValue {
    pub fn object(object: impl super::Scriptable + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Debug for GuestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Self::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Self::Char(c) => f.debug_tuple("Char").field(c).finish(),
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::Object(o) => f.debug_tuple("Object").field(&o.class_name()).finish(),
        }
    }
}

impl PartialEq for GuestValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for GuestValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for GuestValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for GuestValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for GuestValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for GuestValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

fn parse_int<T>(raw: &str, ty: ValueType) -> Result<GuestValue, ScriptError>
where
    T: std::str::FromStr + Into<i64>,
{
    raw.trim()
        .parse::<T>()
        .map(|n| GuestValue::Int(n.into()))
        .map_err(|_| ScriptError::coercion(raw, ty))
}

/// Convert controller text to a value of the declared type.
pub fn coerce(raw: &str, ty: ValueType) -> Result<GuestValue, ScriptError> {
    match ty {
        ValueType::Bool => {
            let text = raw.trim();
            if text.eq_ignore_ascii_case("true") {
                Ok(GuestValue::Bool(true))
            } else if text.eq_ignore_ascii_case("false") {
                Ok(GuestValue::Bool(false))
            } else {
                Err(ScriptError::coercion(raw, ty))
            }
        }
        ValueType::Byte => parse_int::<i8>(raw, ty),
        ValueType::Short => parse_int::<i16>(raw, ty),
        ValueType::Int => parse_int::<i32>(raw, ty),
        ValueType::Long => parse_int::<i64>(raw, ty),
        ValueType::Float => raw
            .trim()
            .parse::<f32>()
            .map(|n| GuestValue::Float(f64::from(n)))
            .map_err(|_| ScriptError::coercion(raw, ty)),
        ValueType::Double => raw
            .trim()
            .parse::<f64>()
            .map(GuestValue::Float)
            .map_err(|_| ScriptError::coercion(raw, ty)),
        ValueType::Char => raw
            .chars()
            .next()
            .map(GuestValue::Char)
            .ok_or_else(|| ScriptError::coercion(raw, ty)),
        ValueType::Str | ValueType::Object => Ok(GuestValue::Str(raw.to_string())),
    }
}

/// Render a number the way a script engine prints it (`3`, not `3.0`).
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_integers_with_range_checks() {
        assert_eq!(coerce(" 42 ", ValueType::Int).unwrap(), GuestValue::Int(42));
        assert_eq!(coerce("-128", ValueType::Byte).unwrap(), GuestValue::Int(-128));
        assert!(coerce("128", ValueType::Byte).is_err());
        assert!(coerce("4.5", ValueType::Long).is_err());
    }

    #[test]
    fn coerces_booleans_case_insensitively() {
        assert_eq!(coerce("TRUE", ValueType::Bool).unwrap(), GuestValue::Bool(true));
        assert_eq!(coerce("false", ValueType::Bool).unwrap(), GuestValue::Bool(false));
        assert!(coerce("yes", ValueType::Bool).is_err());
    }

    #[test]
    fn coerces_char_from_first_character() {
        assert_eq!(coerce("xyz", ValueType::Char).unwrap(), GuestValue::Char('x'));
        assert!(coerce("", ValueType::Char).is_err());
    }

    #[test]
    fn strings_and_objects_pass_through() {
        assert_eq!(coerce(" a ", ValueType::Str).unwrap(), GuestValue::from(" a "));
        assert_eq!(coerce("x", ValueType::Object).unwrap(), GuestValue::from("x"));
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }
}
