// Decoded scalar values

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// A single decoded primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Uint(u32),
    Int(i32),
    Uint64(u64),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl Value {
    /// Integer view used by count sources and mappers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Uint(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Uint64(v) => i64::try_from(*v).ok(),
            Value::Int64(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form for dumps. 64-bit integers that do not fit an `i64` are
    /// written as strings, byte blobs as `0x`-prefixed hex.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Uint(v) => JsonValue::from(*v),
            Value::Int(v) => JsonValue::from(*v),
            Value::Uint64(v) => {
                if *v <= i64::MAX as u64 {
                    JsonValue::from(*v)
                } else {
                    JsonValue::String(v.to_string())
                }
            }
            Value::Int64(v) => JsonValue::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(format!("0x{}", hex(b))),
            Value::Uuid(u) => JsonValue::String(u.hyphenated().to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                if b.len() > 32 {
                    write!(f, "{}... ({} bytes)", hex(&b[..32]), b.len())
                } else {
                    write!(f, "{}", hex(b))
                }
            }
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::Uint(7).as_i64(), Some(7));
        assert_eq!(Value::Int(-3).as_i64(), Some(-3));
        assert_eq!(Value::Uint64(u64::MAX).as_i64(), None);
        assert_eq!(Value::String("x".into()).as_i64(), None);
    }

    #[test]
    fn test_large_u64_json_is_string() {
        assert_eq!(
            Value::Uint64(u64::MAX).to_json(),
            JsonValue::String(u64::MAX.to_string())
        );
        assert_eq!(Value::Uint64(5).to_json(), JsonValue::from(5u64));
    }

    #[test]
    fn test_bytes_display() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(Value::Bytes(vec![1, 2]).to_json(), JsonValue::String("0x0102".into()));
    }
}
