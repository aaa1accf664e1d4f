//! Error-log records.
//!
//! [`ErrorRecord`] captures an entity or item that failed migration, with
//! enough legacy context (id, field, raw value, classification) for manual
//! triage.

use crate::error::{ErrorCategory, MigrationError, Priority};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO-8601 formatted timestamp string.
///
/// Thin wrapper providing type clarity. No format validation; callers are
/// trusted to provide valid ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Create a new timestamp from an ISO-8601 string.
    #[must_use]
    pub fn new(iso8601: impl Into<String>) -> Self {
        Self(iso8601.into())
    }

    /// Current UTC time.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().to_rfc3339())
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity or item that failed migration, routed to the error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Collection the entity belongs to.
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    /// Offending legacy field code, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// JSON-serialized offending raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    pub error_code: String,
    pub error_message: String,
    pub error_category: ErrorCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub failed_at: Timestamp,
}

impl ErrorRecord {
    /// Capture a migration error for the error log.
    #[must_use]
    pub fn from_error(collection: &str, err: &MigrationError) -> Self {
        Self {
            collection: collection.to_string(),
            legacy_id: err.legacy_id.clone(),
            field: err.field.clone(),
            raw_value: err.raw_value.as_ref().map(ToString::to_string),
            error_code: err.code.clone(),
            error_message: err.message.clone(),
            error_category: err.category,
            priority: err.priority,
            failed_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_transparent_serde() {
        let ts = Timestamp::new("2026-01-15T10:30:00Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2026-01-15T10:30:00Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn error_record_keeps_field_context() {
        let err = MigrationError::field_transform(
            "1001",
            "020__a",
            serde_json::json!(["not", "an", "isbn"]),
            "invalid ISBN",
        );
        let rec = ErrorRecord::from_error("books", &err);
        assert_eq!(rec.collection, "books");
        assert_eq!(rec.legacy_id.as_deref(), Some("1001"));
        assert_eq!(rec.field.as_deref(), Some("020__a"));
        assert_eq!(rec.raw_value.as_deref(), Some(r#"["not","an","isbn"]"#));
        assert_eq!(rec.error_category, ErrorCategory::FieldTransform);
    }

    #[test]
    fn error_record_roundtrip() {
        let err = MigrationError::manual_import("TAPE_MEDIA", "on tape", Priority::High)
            .with_legacy_id("77");
        let rec = ErrorRecord::from_error("videos", &err);
        let json = serde_json::to_string(&rec).unwrap();
        let back: ErrorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
