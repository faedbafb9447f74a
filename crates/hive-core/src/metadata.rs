//! Normalized metadata values and their serialized form.
//!
//! Metadata attached to memory artefacts is restricted to JSON-compatible
//! primitives plus timestamps, with nested lists and maps of the same.
//! Timestamps serialize as ISO-8601 strings and are re-detected on load, so
//! a round trip through any adapter is lossless up to datetime/string
//! equivalence. Maps are `BTreeMap`s, which keeps key order deterministic
//! wherever ordering is observable.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HiveError, HiveResult};

/// Normalized metadata mapping carried alongside memory artefacts
pub type MemoryMetadata = BTreeMap<String, MetadataValue>;

/// Supported value types for memory metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Convert into the JSON shape used by every persistence layer
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::Int(value) => Value::from(*value),
            Self::Float(value) => {
                serde_json::Number::from_f64(*value).map_or(Value::Null, Value::Number)
            }
            Self::Text(value) => Value::String(value.clone()),
            Self::Timestamp(value) => Value::String(value.to_rfc3339()),
            Self::List(values) => Value::Array(values.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Rebuild a value from its JSON form, re-detecting ISO timestamps
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Self::Int(int)
                } else {
                    Self::Float(number.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(text) => match DateTime::parse_from_rfc3339(&text) {
                Ok(parsed) => Self::Timestamp(parsed.with_timezone(&Utc)),
                Err(_) => Self::Text(text),
            },
            Value::Array(values) => {
                Self::List(values.into_iter().map(Self::from_json).collect())
            }
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::Timestamp(value) => serializer.serialize_str(&value.to_rfc3339()),
            Self::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(value))
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Encode metadata into a JSON object suitable for any persistence layer
pub fn to_serializable(metadata: &MemoryMetadata) -> serde_json::Map<String, Value> {
    metadata
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

/// Decode a JSON object back into normalized metadata
pub fn from_serializable(payload: &serde_json::Map<String, Value>) -> MemoryMetadata {
    payload
        .iter()
        .map(|(key, value)| (key.clone(), MetadataValue::from_json(value.clone())))
        .collect()
}

/// Serialize metadata as a compact JSON string
pub fn dumps(metadata: &MemoryMetadata) -> String {
    Value::Object(to_serializable(metadata)).to_string()
}

/// Parse a JSON string produced by [`dumps`]
pub fn loads(serialized: &str) -> HiveResult<MemoryMetadata> {
    if serialized.trim().is_empty() {
        return Ok(MemoryMetadata::new());
    }
    let value: Value = serde_json::from_str(serialized)
        .map_err(|e| HiveError::memory(format!("metadata payload is not valid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(from_serializable(&map)),
        _ => Err(HiveError::memory(
            "metadata payload must deserialize into a mapping",
        )),
    }
}

/// Coerce an arbitrary JSON value into a metadata object when possible.
///
/// Accepts objects directly and JSON-encoded object strings, which is how
/// relational adapters hand metadata back from text columns.
pub fn coerce_metadata(value: &Value) -> Option<MemoryMetadata> {
    match value {
        Value::Object(map) => Some(from_serializable(map)),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(from_serializable(&map)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_metadata() -> MemoryMetadata {
        let mut nested = BTreeMap::new();
        nested.insert("depth".to_string(), MetadataValue::Int(2));
        let mut metadata = MemoryMetadata::new();
        metadata.insert("name".to_string(), "artifact".into());
        metadata.insert("score".to_string(), MetadataValue::Float(0.25));
        metadata.insert("active".to_string(), true.into());
        metadata.insert("missing".to_string(), MetadataValue::Null);
        metadata.insert(
            "created".to_string(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap().into(),
        );
        metadata.insert(
            "tags".to_string(),
            MetadataValue::List(vec!["a".into(), "b".into()]),
        );
        metadata.insert("inner".to_string(), MetadataValue::Map(nested));
        metadata
    }

    #[test]
    fn round_trip_is_lossless() {
        let metadata = sample_metadata();
        let decoded = from_serializable(&to_serializable(&metadata));
        assert_eq!(metadata, decoded);
    }

    #[test]
    fn dumps_and_loads_round_trip() {
        let metadata = sample_metadata();
        let decoded = loads(&dumps(&metadata)).unwrap();
        assert_eq!(metadata, decoded);
    }

    #[test]
    fn timestamps_become_iso_strings() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let value = MetadataValue::Timestamp(ts).to_json();
        assert_eq!(value, Value::String("2024-03-01T12:30:00+00:00".into()));
        assert_eq!(
            MetadataValue::from_json(value),
            MetadataValue::Timestamp(ts)
        );
    }

    #[test]
    fn plain_strings_survive_round_trip() {
        let value = MetadataValue::from_json(Value::String("not a date".into()));
        assert_eq!(value, MetadataValue::Text("not a date".into()));
    }

    #[test]
    fn coerce_accepts_encoded_strings() {
        let encoded = Value::String(r#"{"k":"v"}"#.to_string());
        let metadata = coerce_metadata(&encoded).unwrap();
        assert_eq!(metadata["k"], MetadataValue::Text("v".into()));
        assert!(coerce_metadata(&Value::String("not json".into())).is_none());
    }

    #[test]
    fn keys_emit_sorted() {
        let metadata = sample_metadata();
        let keys: Vec<_> = to_serializable(&metadata).keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
