//! State log model types.
//!
//! Pure data types used by `StateBackend` implementations. Kept in the
//! types crate so the engine and state crates can share them without
//! circular dependencies.

use serde::{Deserialize, Serialize};

use crate::entry::LegacyId;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a configured collection pipeline (e.g. `"books"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    /// Create a new collection name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for CollectionName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Status of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for a finished collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub entries_read: u64,
    pub entries_migrated: u64,
    pub entries_already_migrated: u64,
    pub entries_skipped: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Migration state entries
// ---------------------------------------------------------------------------

/// Outcome recorded for one legacy entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created in the destination during this run.
    Migrated,
    /// Found in the destination; no write happened.
    AlreadyMigrated,
}

impl EntryStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::AlreadyMigrated => "already_migrated",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "migrated" => Some(Self::Migrated),
            "already_migrated" => Some(Self::AlreadyMigrated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one migrated legacy entity: legacy id to new id/version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStateEntry {
    pub collection: CollectionName,
    pub legacy_id: LegacyId,
    /// Destination parent (concept) id.
    pub new_id: String,
    /// Destination version id of the published record.
    pub new_version: String,
    pub status: EntryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_from_and_display() {
        let name = CollectionName::from("books");
        assert_eq!(name.as_str(), "books");
        assert_eq!(name.to_string(), "books");
    }

    #[test]
    fn run_status_serde() {
        let json = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::Completed);
    }

    #[test]
    fn entry_status_parse_matches_as_str() {
        for status in [EntryStatus::Migrated, EntryStatus::AlreadyMigrated] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("pending"), None);
    }

    #[test]
    fn run_stats_default_is_zeroed() {
        let stats = RunStats::default();
        assert_eq!(stats.entries_read, 0);
        assert_eq!(stats.entries_migrated, 0);
        assert!(stats.error_message.is_none());
    }

    #[test]
    fn state_entry_serializes_flat() {
        let entry = MigrationStateEntry {
            collection: CollectionName::new("books"),
            legacy_id: LegacyId::new("1001"),
            new_id: "abcd-1234".into(),
            new_version: "efgh-5678".into(),
            status: EntryStatus::Migrated,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["collection"], "books");
        assert_eq!(json["legacy_id"], "1001");
        assert_eq!(json["status"], "migrated");
    }
}
