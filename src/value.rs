//! Scalar values and provider type tags.
//!
//! `ScalarValue` is the closed union of everything the engine moves between
//! models, parameters, and records. `ProviderType` is the matching provider
//! type tag; it is inferred from a value's runtime variant when a constant
//! leaf is registered as a parameter.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(JsonValue),
}

/// Provider type tags for parameter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float64,
    Decimal,
    Text,
    Uuid,
    Date,
    Timestamp,
    Bytes,
    Json,
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Infer the provider type from the runtime variant. `None` for `Null`:
    /// a null constant carries no type and is rejected by the expression
    /// compiler.
    pub fn provider_type(&self) -> Option<ProviderType> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(_) => Some(ProviderType::Bool),
            ScalarValue::Int16(_) => Some(ProviderType::Int16),
            ScalarValue::Int32(_) => Some(ProviderType::Int32),
            ScalarValue::Int64(_) => Some(ProviderType::Int64),
            ScalarValue::Float64(_) => Some(ProviderType::Float64),
            ScalarValue::Decimal(_) => Some(ProviderType::Decimal),
            ScalarValue::Text(_) => Some(ProviderType::Text),
            ScalarValue::Uuid(_) => Some(ProviderType::Uuid),
            ScalarValue::Date(_) => Some(ProviderType::Date),
            ScalarValue::Timestamp(_) => Some(ProviderType::Timestamp),
            ScalarValue::Bytes(_) => Some(ProviderType::Bytes),
            ScalarValue::Json(_) => Some(ProviderType::Json),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int16(v) => Some(i64::from(*v)),
            ScalarValue::Int32(v) => Some(i64::from(*v)),
            ScalarValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            ScalarValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Short variant name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Null => "null",
            ScalarValue::Bool(_) => "bool",
            ScalarValue::Int16(_) => "int16",
            ScalarValue::Int32(_) => "int32",
            ScalarValue::Int64(_) => "int64",
            ScalarValue::Float64(_) => "float64",
            ScalarValue::Decimal(_) => "decimal",
            ScalarValue::Text(_) => "text",
            ScalarValue::Uuid(_) => "uuid",
            ScalarValue::Date(_) => "date",
            ScalarValue::Timestamp(_) => "timestamp",
            ScalarValue::Bytes(_) => "bytes",
            ScalarValue::Json(_) => "json",
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i16> for ScalarValue {
    fn from(v: i16) -> Self {
        ScalarValue::Int16(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<Decimal> for ScalarValue {
    fn from(v: Decimal) -> Self {
        ScalarValue::Decimal(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Text(v)
    }
}

impl From<Uuid> for ScalarValue {
    fn from(v: Uuid) -> Self {
        ScalarValue::Uuid(v)
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(v: NaiveDate) -> Self {
        ScalarValue::Date(v)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(v: DateTime<Utc>) -> Self {
        ScalarValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(v: Vec<u8>) -> Self {
        ScalarValue::Bytes(v)
    }
}

impl From<JsonValue> for ScalarValue {
    fn from(v: JsonValue) -> Self {
        ScalarValue::Json(v)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => ScalarValue::Null,
        }
    }
}
