//! Document identity and body.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::path::FieldPath;

/// Opaque document identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document: identity plus a JSON object body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub body: Value,
}

impl Document {
    /// Create a document with a generated id.
    pub fn new(body: Value) -> Result<Self, StoreError> {
        Self::with_id(DocumentId::new(), body)
    }

    /// Create a document with an explicit id. The body must be a JSON object.
    pub fn with_id(id: impl Into<DocumentId>, body: Value) -> Result<Self, StoreError> {
        if !body.is_object() {
            return Err(StoreError::InvalidDocument(
                "document body must be a JSON object".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            body,
        })
    }

    /// Value at `path`, if present.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.get(&self.body)
    }
}

/// Read a timestamp stored in a document.
///
/// RFC 3339 strings and integer Unix epoch milliseconds are accepted.
pub fn read_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Encode a timestamp the way the stores write it (RFC 3339, millisecond precision).
///
/// Sub-millisecond digits are truncated.
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(timestamp_text(at))
}

pub(crate) fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Round `at` up to the next whole millisecond, so that writing it with
/// [`timestamp_value`] never yields an earlier instant.
pub fn ceil_to_millis(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let excess = at.timestamp_subsec_nanos() % 1_000_000;
    if excess == 0 {
        return Some(at);
    }
    at.checked_add_signed(chrono::Duration::nanoseconds(i64::from(1_000_000 - excess)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_requires_object() {
        assert!(Document::new(json!({"a": 1})).is_ok());
        assert!(Document::new(json!([1, 2])).is_err());
        assert!(Document::new(json!("text")).is_err());
    }

    #[test]
    fn test_document_id_generated_unique() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }

    #[test]
    fn test_read_timestamp_rfc3339() {
        let at = read_timestamp(&json!("2024-03-01T12:00:00Z")).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        let offset = read_timestamp(&json!("2024-03-01T13:00:00+01:00")).unwrap();
        assert_eq!(offset, at);
    }

    #[test]
    fn test_read_timestamp_millis() {
        let at = read_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_read_timestamp_rejects_other_values() {
        assert!(read_timestamp(&json!("yesterday")).is_none());
        assert!(read_timestamp(&json!(null)).is_none());
        assert!(read_timestamp(&json!(true)).is_none());
    }

    #[test]
    fn test_timestamp_value_round_trips() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let value = timestamp_value(at);
        assert_eq!(value, json!("2030-01-02T03:04:05.000Z"));
        assert_eq!(read_timestamp(&value), Some(at));
    }

    #[test]
    fn test_ceil_to_millis() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(ceil_to_millis(at), Some(at));

        let fractional = at + chrono::Duration::microseconds(1_250);
        let rounded = ceil_to_millis(fractional).unwrap();
        assert_eq!(rounded, at + chrono::Duration::milliseconds(2));
        assert_eq!(read_timestamp(&timestamp_value(rounded)), Some(rounded));
    }
}
