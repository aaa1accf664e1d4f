//! Usage statistics events and destination bulk actions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::LegacyId;

/// Kind of legacy usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A file of the record was downloaded.
    Download,
    /// The record landing page was viewed.
    Pageview,
}

impl EventType {
    /// Wire-format string, also used in config keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Pageview => "pageview",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File a download event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    /// Legacy document (file) identifier.
    pub file_id: String,
    /// Legacy file version number.
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// One usage event as read from the legacy index. Read once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub legacy_event_id: String,
    pub legacy_entity_id: LegacyId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub visitor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub is_robot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileContext>,
}

/// Usage event bound to a destination entity and version, ready to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemappedEvent {
    /// Deterministic destination document id (`migrated_<legacy_event_id>`).
    #[serde(skip)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Destination version id the event is bound to.
    pub recid: String,
    /// Destination parent (concept) id.
    pub parent_recid: String,
    pub legacy_event_id: String,
    pub legacy_entity_id: LegacyId,
    pub event_type: EventType,
    pub visitor_id: String,
    pub unique_session_id: Option<String>,
    pub unique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub is_robot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    pub migrated: bool,
}

impl RemappedEvent {
    /// Destination id derived from the legacy event id.
    #[must_use]
    pub fn migrated_id(legacy_event_id: &str) -> String {
        format!("migrated_{legacy_event_id}")
    }
}

/// Bulk operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Write only if the id does not exist yet.
    Create,
    Index,
}

impl OpType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Index => "index",
        }
    }
}

/// One destination bulk action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkAction {
    #[serde(rename = "_op_type")]
    pub op_type: OpType,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: Value,
}

impl BulkAction {
    /// Create-only action; repeated writes of the same id are rejected
    /// without failing the batch.
    #[must_use]
    pub fn create(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            op_type: OpType::Create,
            index: index.into(),
            id: id.into(),
            source,
        }
    }
}
