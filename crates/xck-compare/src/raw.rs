//! Accessors over raw (untyped) JSON-RPC records.
//!
//! Raw records are `serde_json::Value` trees. A key can be missing, present
//! with `null`, or present with a value, and the normalization rules treat
//! those three cases differently, so lookups go through [`Field`] rather than
//! `Option<&Value>`. Every accessor that expects a particular shape fails with
//! [`ProtocolDecodeError`] instead of panicking.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ProtocolDecodeError;

/// One key of a raw record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Absent,
    Null,
    Present(&'a Value),
}

impl<'a> Field<'a> {
    /// Look `key` up in `record`. Non-object records have no fields.
    pub fn of(record: &'a Value, key: &str) -> Self {
        match record.as_object().and_then(|m| m.get(key)) {
            None => Field::Absent,
            Some(Value::Null) => Field::Null,
            Some(v) => Field::Present(v),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }

    /// Absent or `null`.
    pub fn is_missing(&self) -> bool {
        !self.is_present()
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Field::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value().and_then(Value::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value().and_then(Value::as_bool)
    }
}

pub fn require_object<'a>(
    record: &'a Value,
    what: &str,
) -> Result<&'a Map<String, Value>, ProtocolDecodeError> {
    record.as_object().ok_or_else(|| ProtocolDecodeError::NotAnObject {
        what: what.to_string(),
    })
}

pub fn require_object_mut<'a>(
    record: &'a mut Value,
    what: &str,
) -> Result<&'a mut Map<String, Value>, ProtocolDecodeError> {
    record
        .as_object_mut()
        .ok_or_else(|| ProtocolDecodeError::NotAnObject {
            what: what.to_string(),
        })
}

/// A field that must be present and non-null.
pub fn require<'a>(record: &'a Value, key: &str, what: &str) -> Result<&'a Value, ProtocolDecodeError> {
    Field::of(record, key)
        .value()
        .ok_or_else(|| ProtocolDecodeError::MissingField {
            what: what.to_string(),
            field: key.to_string(),
        })
}

pub fn require_str<'a>(record: &'a Value, key: &str, what: &str) -> Result<&'a str, ProtocolDecodeError> {
    require(record, key, what)?
        .as_str()
        .ok_or_else(|| ProtocolDecodeError::WrongShape {
            what: what.to_string(),
            field: key.to_string(),
            expected: "string",
        })
}

pub fn require_array<'a>(
    record: &'a Value,
    key: &str,
    what: &str,
) -> Result<&'a Vec<Value>, ProtocolDecodeError> {
    require(record, key, what)?
        .as_array()
        .ok_or_else(|| ProtocolDecodeError::WrongShape {
            what: what.to_string(),
            field: key.to_string(),
            expected: "array",
        })
}

/// Decode a raw tree into its typed form, the way a typed client would.
pub fn decode<T: DeserializeOwned>(raw: &Value, what: &str) -> Result<T, ProtocolDecodeError> {
    serde_json::from_value(raw.clone()).map_err(|e| ProtocolDecodeError::Json {
        what: what.to_string(),
        message: e.to_string(),
    })
}
