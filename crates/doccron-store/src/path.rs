//! Dot-separated field paths into JSON document bodies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A parsed field path such as `"schedule.sleepUntil"`.
///
/// Paths address nested object members only; array indexing is not
/// supported. Segments must be non-empty and must not contain `"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dot-separated path.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidFieldPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment.contains('"') {
                return Err(invalid("segments may not contain '\"'"));
            }
            segments.push(segment.to_string());
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// SQLite JSON path expression (`$."a"."b"`).
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            out.push_str(".\"");
            out.push_str(segment);
            out.push('"');
        }
        out
    }

    /// Look up the value at this path.
    ///
    /// Returns `None` when any segment is missing. A present JSON `null`
    /// is returned as `Some(&Value::Null)`.
    pub fn get<'a>(&self, body: &'a Value) -> Option<&'a Value> {
        let mut current = body;
        for segment in &self.segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Whether the path is present in `body` (a `null` value counts).
    pub fn exists(&self, body: &Value) -> bool {
        self.get(body).is_some()
    }

    /// Set the value at this path, creating intermediate objects.
    pub fn set(&self, body: &mut Value, value: Value) -> Result<(), StoreError> {
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or_else(|| self.traversal_error("path is empty"))?;

        let mut current = body;
        for segment in parents {
            let object = current
                .as_object_mut()
                .ok_or_else(|| self.traversal_error("intermediate value is not an object"))?;
            current = object
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let object = current
            .as_object_mut()
            .ok_or_else(|| self.traversal_error("intermediate value is not an object"))?;
        object.insert(last.clone(), value);
        Ok(())
    }

    /// Remove the value at this path. Returns whether anything was removed.
    pub fn unset(&self, body: &mut Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };

        let mut current = body;
        for segment in parents {
            match current.as_object_mut().and_then(|o| o.get_mut(segment)) {
                Some(next) => current = next,
                None => return false,
            }
        }

        current
            .as_object_mut()
            .map(|o| o.remove(last).is_some())
            .unwrap_or(false)
    }

    fn traversal_error(&self, reason: &str) -> StoreError {
        StoreError::InvalidFieldPath {
            path: self.raw.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for FieldPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple() {
        let path = FieldPath::parse("sleepUntil").unwrap();
        assert_eq!(path.segments(), &["sleepUntil".to_string()]);
        assert_eq!(path.as_str(), "sleepUntil");
    }

    #[test]
    fn test_parse_nested() {
        let path: FieldPath = "cron.sleepUntil".parse().unwrap();
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.json_path(), "$.\"cron\".\"sleepUntil\"");
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse(".a").is_err());
        assert!(FieldPath::parse("a\"b").is_err());
    }

    #[test]
    fn test_get_distinguishes_null_and_missing() {
        let body = json!({"a": {"b": null}});
        let present = FieldPath::parse("a.b").unwrap();
        let missing = FieldPath::parse("a.c").unwrap();

        assert_eq!(present.get(&body), Some(&Value::Null));
        assert!(present.exists(&body));
        assert_eq!(missing.get(&body), None);
        assert!(!missing.exists(&body));
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut body = json!({});
        let path = FieldPath::parse("x.y.z").unwrap();
        path.set(&mut body, json!(5)).unwrap();
        assert_eq!(body, json!({"x": {"y": {"z": 5}}}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut body = json!({"x": 1});
        let path = FieldPath::parse("x.y").unwrap();
        assert!(path.set(&mut body, json!(true)).is_err());
    }

    #[test]
    fn test_unset() {
        let mut body = json!({"a": {"b": 1, "c": 2}});
        let path = FieldPath::parse("a.b").unwrap();
        assert!(path.unset(&mut body));
        assert!(!path.unset(&mut body));
        assert_eq!(body, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_serde_as_string() {
        let path = FieldPath::parse("a.b").unwrap();
        let encoded = serde_json::to_string(&path).unwrap();
        assert_eq!(encoded, "\"a.b\"");

        let decoded: FieldPath = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, path);
        assert!(serde_json::from_str::<FieldPath>("\"a..b\"").is_err());
    }
}
