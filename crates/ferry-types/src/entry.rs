//! Legacy entries, revisions, and transformed records.
//!
//! A [`LegacyEntry`] is one entity of the old system as extracted, with one
//! or more historical snapshots. Each snapshot transforms into a
//! [`Revision`]; the latest revision's [`TransformedRecord`] is what gets
//! loaded.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of an entity in the legacy system.
///
/// Legacy ids are numeric in most dumps but arrive as strings in grouped
/// layouts, so they are kept as their decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyId(String);

impl LegacyId {
    /// Create a new legacy id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id from a JSON number or non-empty string.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self(n.to_string())),
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for LegacyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for LegacyId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for LegacyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Field code to value(s). Repeatable fields hold a JSON array.
pub type LegacyFields = BTreeMap<String, Value>;

/// One historical snapshot of a legacy entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    pub timestamp: DateTime<Utc>,
    pub fields: LegacyFields,
}

/// Raw entity extracted from the legacy system. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntry {
    pub id: LegacyId,
    /// Collection tags used for model selection (upper-cased).
    pub tags: BTreeSet<String>,
    /// Owning entity for sub-records such as comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LegacyId>,
    /// Snapshots in extraction order.
    pub snapshots: Vec<LegacySnapshot>,
}

impl LegacyEntry {
    /// Build an entry with a single snapshot.
    #[must_use]
    pub fn single(
        id: LegacyId,
        tags: impl IntoIterator<Item = String>,
        timestamp: DateTime<Utc>,
        fields: LegacyFields,
    ) -> Self {
        Self {
            id,
            tags: normalize_tags(tags),
            parent: None,
            snapshots: vec![LegacySnapshot { timestamp, fields }],
        }
    }

    /// Returns `true` when the entry carries `tag` (case-insensitive).
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_ascii_uppercase())
    }
}

/// Upper-case and de-duplicate collection tags.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_ascii_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Legacy fields that were dropped on purpose or had no handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub ignored: BTreeSet<String>,
    pub unmapped: BTreeSet<String>,
}

/// Normalized record produced by one transform model from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub legacy_id: LegacyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LegacyId>,
    /// Name of the model that produced the record.
    pub model: String,
    pub fields: Map<String, Value>,
    pub provenance: Provenance,
}

/// A transformed snapshot together with its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub timestamp: DateTime<Utc>,
    pub payload: TransformedRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_id_from_number_and_string() {
        assert_eq!(LegacyId::from_json(&json!(1001)), Some(LegacyId::new("1001")));
        assert_eq!(LegacyId::from_json(&json!(" 42 ")), Some(LegacyId::new("42")));
        assert_eq!(LegacyId::from_json(&json!("")), None);
        assert_eq!(LegacyId::from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn tags_are_normalized() {
        let entry = LegacyEntry::single(
            LegacyId::from(1u64),
            vec!["book".to_string(), " BOOK ".to_string(), String::new()],
            DateTime::<Utc>::UNIX_EPOCH,
            LegacyFields::new(),
        );
        assert_eq!(entry.tags.len(), 1);
        assert!(entry.has_tag("Book"));
    }

    #[test]
    fn legacy_id_serializes_transparent() {
        let json = serde_json::to_string(&LegacyId::new("7")).unwrap();
        assert_eq!(json, "\"7\"");
    }
}
