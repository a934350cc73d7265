//! Record snapshot model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Field map backing a snapshot. Keys iterate in sorted order.
pub type FieldMap = Map<String, Value>;

/// One side (client or server) of a conflicting entity.
///
/// Snapshots are immutable once captured: the engine only ever builds new
/// snapshots from old ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSnapshot(FieldMap);

impl RecordSnapshot {
    /// Wrap an existing field map
    #[must_use]
    pub const fn new(fields: FieldMap) -> Self {
        Self(fields)
    }

    /// Build a snapshot from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::InvalidInput(format!(
                "record snapshot must be a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Return a copy of this snapshot with one field set
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub const fn fields(&self) -> &FieldMap {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a field as Unix milliseconds.
    ///
    /// Numbers are taken as milliseconds; strings may be RFC 3339 timestamps or
    /// integer milliseconds.
    pub fn timestamp_ms(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(parse_timestamp)
    }

    /// Read a string field, trimmed
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn into_fields(self) -> FieldMap {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<FieldMap> for RecordSnapshot {
    fn from(fields: FieldMap) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for RecordSnapshot {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// Parse a JSON value as Unix milliseconds
#[allow(clippy::cast_possible_truncation)]
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|ms| ms.is_finite()).map(|ms| ms as i64)),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(ms) = text.parse::<i64>() {
                return Some(ms);
            }
            chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|datetime| datetime.timestamp_millis())
        }
        _ => None,
    }
}

/// Short name of a JSON value's type, for notes and error messages
pub const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(RecordSnapshot::from_value(json!([1, 2])).is_err());
        assert!(RecordSnapshot::from_value(json!("a1")).is_err());
        assert!(RecordSnapshot::from_value(json!({"id": "a1"})).is_ok());
    }

    #[test]
    fn timestamp_accepts_numbers_and_rfc3339() {
        let snapshot = RecordSnapshot::default()
            .with_field("ms", 1_700_000_000_000_i64)
            .with_field("iso", "2024-01-01T00:00:00Z")
            .with_field("text", "1500")
            .with_field("bad", "yesterday");

        assert_eq!(snapshot.timestamp_ms("ms"), Some(1_700_000_000_000));
        assert_eq!(snapshot.timestamp_ms("iso"), Some(1_704_067_200_000));
        assert_eq!(snapshot.timestamp_ms("text"), Some(1500));
        assert_eq!(snapshot.timestamp_ms("bad"), None);
        assert_eq!(snapshot.timestamp_ms("missing"), None);
    }

    #[test]
    fn str_field_trims_and_rejects_empty() {
        let snapshot = RecordSnapshot::default()
            .with_field("name", "  Checking ")
            .with_field("blank", "   ");
        assert_eq!(snapshot.str_field("name"), Some("Checking"));
        assert_eq!(snapshot.str_field("blank"), None);
    }
}
