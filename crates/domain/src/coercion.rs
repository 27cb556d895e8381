//! Write-path value coercion.
//!
//! Values arrive from the request boundary as JSON (usually strings typed into
//! a dashboard) and must be turned into the tag's native wire type before any
//! protocol call is made. Every failure here is an `InvalidValue` and happens
//! before the transport is touched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};

/// Native datatype of a value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl WireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
        }
    }

    /// Maps an OPC UA built-in DataType id onto a wire type.
    pub fn from_opcua_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::Boolean),
            2 => Some(Self::SByte),
            3 => Some(Self::Byte),
            4 => Some(Self::Int16),
            5 => Some(Self::UInt16),
            6 => Some(Self::Int32),
            7 => Some(Self::UInt32),
            8 => Some(Self::Int64),
            9 => Some(Self::UInt64),
            10 => Some(Self::Float),
            11 => Some(Self::Double),
            12 => Some(Self::String),
            _ => None,
        }
    }

    /// Inclusive bounds for the integer family.
    pub fn integer_bounds(&self) -> Option<(i128, i128)> {
        match self {
            Self::SByte => Some((i8::MIN as i128, i8::MAX as i128)),
            Self::Byte => Some((0, u8::MAX as i128)),
            Self::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Self::UInt16 => Some((0, u16::MAX as i128)),
            Self::Int32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Self::UInt32 => Some((0, u32::MAX as i128)),
            Self::Int64 => Some((i64::MIN as i128, i64::MAX as i128)),
            Self::UInt64 => Some((0, u64::MAX as i128)),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.integer_bounds().is_some()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

impl std::fmt::Display for WireType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value already converted to its wire representation.
///
/// 64-bit integers stay exact: signed values are carried as `i64`, unsigned
/// as `u64`, never through a float.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Boolean(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl WireValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::UInt(u) => Value::from(*u),
            Self::Float(f) => Value::from(*f as f64),
            Self::Double(f) => Value::from(*f),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// Coerces a caller-supplied value to `target`.
pub fn coerce(raw: &Value, target: WireType) -> Result<WireValue> {
    match target {
        WireType::Boolean => coerce_bool(raw),
        WireType::Float | WireType::Double => coerce_float(raw, target),
        WireType::String => Ok(WireValue::String(match raw {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        integer => coerce_integer(raw, integer),
    }
}

fn invalid(raw: &Value, target: WireType) -> DomainError {
    DomainError::InvalidValue(format!("Cannot convert {} to {}", raw, target))
}

fn coerce_bool(raw: &Value) -> Result<WireValue> {
    match raw {
        Value::Bool(b) => Ok(WireValue::Boolean(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(WireValue::Boolean(true)),
            "false" | "0" => Ok(WireValue::Boolean(false)),
            _ => Err(invalid(raw, WireType::Boolean)),
        },
        _ => Err(invalid(raw, WireType::Boolean)),
    }
}

fn coerce_integer(raw: &Value, target: WireType) -> Result<WireValue> {
    let parsed: i128 = match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i as i128
            } else if let Some(u) = n.as_u64() {
                u as i128
            } else {
                return Err(DomainError::InvalidValue(format!(
                    "{} is not an integer",
                    raw
                )));
            }
        }
        Value::String(s) => s.trim().parse::<i128>().map_err(|_| {
            DomainError::InvalidValue(format!("Cannot convert \"{}\" to integer", s))
        })?,
        _ => return Err(invalid(raw, target)),
    };

    // Checked against the declared width, not just "is it a number".
    let (min, max) = target
        .integer_bounds()
        .ok_or_else(|| invalid(raw, target))?;
    if parsed < min || parsed > max {
        return Err(DomainError::InvalidValue(format!(
            "{} is out of range for {} ({}..={})",
            parsed, target, min, max
        )));
    }

    if min < 0 {
        Ok(WireValue::Int(parsed as i64))
    } else {
        Ok(WireValue::UInt(parsed as u64))
    }
}

fn coerce_float(raw: &Value, target: WireType) -> Result<WireValue> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(raw, target))?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            DomainError::InvalidValue(format!("Cannot convert \"{}\" to float", s))
        })?,
        _ => return Err(invalid(raw, target)),
    };

    if !parsed.is_finite() {
        return Err(DomainError::InvalidValue(format!(
            "{} is not a finite number",
            raw
        )));
    }

    match target {
        WireType::Float => {
            if parsed.abs() > f32::MAX as f64 {
                return Err(DomainError::InvalidValue(format!(
                    "{} is out of range for Float",
                    parsed
                )));
            }
            Ok(WireValue::Float(parsed as f32))
        }
        _ => Ok(WireValue::Double(parsed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bool_accepts_words_and_digits() {
        assert_eq!(
            coerce(&json!("TRUE"), WireType::Boolean).unwrap(),
            WireValue::Boolean(true)
        );
        assert_eq!(
            coerce(&json!("0"), WireType::Boolean).unwrap(),
            WireValue::Boolean(false)
        );
        assert_eq!(
            coerce(&json!(true), WireType::Boolean).unwrap(),
            WireValue::Boolean(true)
        );
    }

    #[test]
    fn test_bool_rejects_anything_else() {
        let err = coerce(&json!("notabool"), WireType::Boolean).unwrap_err();
        assert!(matches!(err, DomainError::InvalidValue(_)));
        assert!(coerce(&json!(1), WireType::Boolean).is_err());
        assert!(coerce(&json!("yes"), WireType::Boolean).is_err());
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(
            coerce(&json!("-42"), WireType::Int16).unwrap(),
            WireValue::Int(-42)
        );
        assert_eq!(
            coerce(&json!(" 200 "), WireType::Byte).unwrap(),
            WireValue::UInt(200)
        );
        assert_eq!(
            coerce(&json!(7), WireType::Int32).unwrap(),
            WireValue::Int(7)
        );
    }

    #[test]
    fn test_integer_rejects_fractions_and_text() {
        assert!(coerce(&json!("3.5"), WireType::Int16).is_err());
        assert!(coerce(&json!(3.5), WireType::Int16).is_err());
        assert!(coerce(&json!("abc"), WireType::UInt16).is_err());
        assert!(coerce(&json!(true), WireType::Int16).is_err());
    }

    #[test]
    fn test_integer_range_is_checked_against_width() {
        assert!(coerce(&json!("32768"), WireType::Int16).is_err());
        assert!(coerce(&json!("-1"), WireType::UInt16).is_err());
        assert!(coerce(&json!("256"), WireType::Byte).is_err());
        assert!(coerce(&json!("-129"), WireType::SByte).is_err());
        assert_eq!(
            coerce(&json!("65535"), WireType::UInt16).unwrap(),
            WireValue::UInt(65535)
        );
    }

    #[test]
    fn test_64_bit_values_stay_exact() {
        assert_eq!(
            coerce(&json!("9007199254740993"), WireType::Int64).unwrap(),
            WireValue::Int(9_007_199_254_740_993)
        );
        assert_eq!(
            coerce(&json!("18446744073709551615"), WireType::UInt64).unwrap(),
            WireValue::UInt(u64::MAX)
        );
        assert!(coerce(&json!("18446744073709551616"), WireType::UInt64).is_err());
        assert!(coerce(&json!("9223372036854775808"), WireType::Int64).is_err());
    }

    #[test]
    fn test_float_parsing() {
        assert_eq!(
            coerce(&json!("21.5"), WireType::Double).unwrap(),
            WireValue::Double(21.5)
        );
        assert_eq!(
            coerce(&json!(1.25), WireType::Float).unwrap(),
            WireValue::Float(1.25)
        );
        assert!(coerce(&json!("NaN"), WireType::Double).is_err());
        assert!(coerce(&json!("inf"), WireType::Float).is_err());
        assert!(coerce(&json!("1e300"), WireType::Float).is_err());
        assert!(coerce(&json!("warm"), WireType::Float).is_err());
    }

    #[test]
    fn test_string_passes_through() {
        assert_eq!(
            coerce(&json!(" padded "), WireType::String).unwrap(),
            WireValue::String(" padded ".to_string())
        );
        assert_eq!(
            coerce(&json!(12), WireType::String).unwrap(),
            WireValue::String("12".to_string())
        );
    }

    #[test]
    fn test_opcua_type_ids() {
        assert_eq!(WireType::from_opcua_id(1), Some(WireType::Boolean));
        assert_eq!(WireType::from_opcua_id(11), Some(WireType::Double));
        assert_eq!(WireType::from_opcua_id(13), None);
    }

    #[test]
    fn test_wire_value_json() {
        assert_eq!(WireValue::UInt(u64::MAX).to_json(), json!(u64::MAX));
        assert_eq!(WireValue::Float(1.5).to_json(), json!(1.5));
    }
}
