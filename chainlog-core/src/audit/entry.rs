//! Audit Entry Definitions
//!
//! An event is a free-form JSON map supplied by the caller. Once the writer
//! has stamped it with a timestamp (and the chain fields, when integrity is
//! enabled) it becomes an [`AuditEntry`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AuditError, Result};

/// Write-time timestamp, ISO-8601 UTC with millisecond precision
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Hash of the previous entry, or null for the first entry of a chain
pub const PREV_HASH_FIELD: &str = "prevHash";
/// Keyed hash of this entry
pub const HASH_FIELD: &str = "hash";

/// Caller-side event payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEvent {
    fields: Map<String, Value>,
}

impl AuditEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add a field only when a value is present
    pub fn field_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    /// Build an event from any JSON value. Only maps are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            Value::Null => Err(AuditError::config("audit event must not be null")),
            other => Err(AuditError::config(format!(
                "audit event must be a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Build an event from a serializable value (structs, maps, `json!` literals)
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    pub(crate) fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for AuditEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// An entry as persisted in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntry {
    fields: Map<String, Value>,
}

impl AuditEntry {
    pub(crate) fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.fields.get(TIMESTAMP_FIELD).and_then(Value::as_str)
    }

    /// `prevHash`, treating a missing field the same as null
    pub fn prev_hash(&self) -> Option<&str> {
        self.fields.get(PREV_HASH_FIELD).and_then(Value::as_str)
    }

    pub fn hash(&self) -> Option<&str> {
        self.fields.get(HASH_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Serialize as a single NDJSON line (without the trailing newline)
    pub fn to_line(&self) -> String {
        super::canonical::canonical_json(&Value::Object(self.fields.clone()))
    }
}

impl From<AuditEntry> for Value {
    fn from(entry: AuditEntry) -> Self {
        Value::Object(entry.fields)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new()
            .field("action", "login")
            .field("attempt", 2)
            .field_opt("reason", None::<&str>)
            .field_opt("user", Some("alice"));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"action": "login", "attempt": 2, "user": "alice"}));
    }

    #[test_case(json!(null) ; "null")]
    #[test_case(json!("text") ; "string")]
    #[test_case(json!(42) ; "number")]
    #[test_case(json!([1, 2]) ; "array")]
    #[test_case(json!(true) ; "boolean")]
    fn test_non_object_events_rejected(value: Value) {
        let err = AuditEvent::from_value(value).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_serialize_skips_absent_fields() {
        #[derive(Serialize)]
        struct Login<'a> {
            user: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            mfa: Option<bool>,
        }

        let event = AuditEvent::from_serialize(&Login { user: "bob", mfa: None }).unwrap();
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"user": "bob"}));
    }

    #[test]
    fn test_entry_accessors() {
        let entry = AuditEntry::from_fields(
            json!({"timestamp": "2024-01-01T00:00:00.000Z", "prevHash": null, "hash": "ab"})
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(entry.timestamp(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(entry.prev_hash(), None);
        assert_eq!(entry.hash(), Some("ab"));
        assert_eq!(
            entry.to_line(),
            r#"{"hash":"ab","prevHash":null,"timestamp":"2024-01-01T00:00:00.000Z"}"#
        );
    }
}
