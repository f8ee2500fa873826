//! The dynamic value model interpreted by the engines.
//!
//! A [Value] is what a layout serializes from and deserializes to. Numeric
//! wire fields up to 6 bytes wide decode as native integers ([Value::U64],
//! [Value::I64]); wider fields decode as [Value::Big]. [Value::F64] and
//! [Value::Str] are produced only by user conversions and switch labels.

use crate::Error;
use bytes::Bytes;
use num_bigint::BigInt;
use num_traits::FromPrimitive;
use std::collections::BTreeMap;

/// A dynamic value shaped by some layout.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// An unsigned integer (numeric items up to 6 bytes wide).
    U64(u64),
    /// A signed integer (numeric items up to 6 bytes wide).
    I64(i64),
    /// An arbitrary-precision integer (numeric items wider than 6 bytes).
    Big(BigInt),
    /// A float, produced by user conversions only.
    F64(f64),
    /// Raw bytes. Decoded values are zero-copy views over the input buffer.
    Bytes(Bytes),
    /// A string, produced by user conversions and switch labels.
    Str(String),
    /// An array of values.
    List(Vec<Value>),
    /// A set of named fields, as produced by a proper layout.
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a [Value::Struct] from `(name, value)` pairs.
    pub fn structure<N: Into<String>>(fields: impl IntoIterator<Item = (N, Value)>) -> Self {
        Value::Struct(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Builds a [Value::Bytes] from anything byte-like.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Value::Bytes(data.into())
    }

    /// Builds a [Value::List].
    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Value::List(values.into_iter().collect())
    }

    /// Looks up a field by name, if this is a struct.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// The underlying bytes, if this is a bytes value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The underlying elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// The underlying fields, if this is a struct.
    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// The underlying string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value can be interpreted as an exact integer.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::U64(_) | Value::I64(_) | Value::Big(_) | Value::F64(_)
        )
    }

    /// Interprets this value as an exact integer.
    ///
    /// Floats are accepted only when integral; everything else numeric
    /// converts losslessly. Non-numeric values and fractional floats are
    /// [Error::OutOfRange].
    pub fn to_bigint(&self) -> Result<BigInt, Error> {
        match self {
            Value::U64(v) => Ok(BigInt::from(*v)),
            Value::I64(v) => Ok(BigInt::from(*v)),
            Value::Big(v) => Ok(v.clone()),
            Value::F64(v) => {
                if !v.is_finite() || v.fract() != 0.0 {
                    return Err(Error::OutOfRange(format!("non-integer number {v}")));
                }
                BigInt::from_f64(*v)
                    .ok_or_else(|| Error::OutOfRange(format!("non-integer number {v}")))
            }
            other => Err(Error::OutOfRange(format!("expected a number, got {other:?}"))),
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U64(v as u64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U64(v as u64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U64(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::Big(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_lookup() {
        let value = Value::structure([("port", Value::from(80u16)), ("ttl", Value::from(64u8))]);
        assert_eq!(value.get("port"), Some(&Value::U64(80)));
        assert_eq!(value.get("missing"), None);
        assert_eq!(Value::U64(1).get("port"), None);
    }

    #[test]
    fn test_to_bigint_exact() {
        assert_eq!(Value::U64(42).to_bigint().unwrap(), BigInt::from(42));
        assert_eq!(Value::I64(-2).to_bigint().unwrap(), BigInt::from(-2));
        assert_eq!(Value::F64(258.0).to_bigint().unwrap(), BigInt::from(258));
        assert!(matches!(
            Value::F64(2.58).to_bigint(),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            Value::Str("nope".into()).to_bigint(),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn test_bytes_view() {
        let value = Value::bytes(vec![1u8, 2, 3]);
        assert_eq!(value.as_bytes().unwrap().as_ref(), &[1, 2, 3]);
    }
}
