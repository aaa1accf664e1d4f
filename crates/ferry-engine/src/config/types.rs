//! Migration YAML configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ferry_types::event::EventType;
use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Top-level migration configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub version: String,
    pub migration: String,
    /// Abort remaining collections after the first collection failure.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Legacy search cluster. Required by search extractors and statistics.
    #[serde(default)]
    pub source: Option<SourceConfig>,
    /// Record-management service. Required for non-dry runs.
    #[serde(default)]
    pub destination: Option<DestinationConfig>,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub stats: Option<StatsConfig>,
}

impl MigrationConfig {
    /// Look up a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// State database location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    /// `SQLite` file path. Defaults to `~/.ferry/state.db`.
    #[serde(default)]
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay_ms() -> u64 {
    5000
}

/// Legacy search cluster endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Record-management service endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Search cluster holding the destination statistics indices.
    #[serde(default)]
    pub search_url: Option<String>,
    /// Metadata field the service indexes legacy ids under.
    #[serde(default = "default_legacy_id_field")]
    pub legacy_id_field: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_legacy_id_field() -> String {
    "legacy_recid".to_string()
}

/// One logical collection pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

impl CollectionConfig {
    /// Resolve a dump path against `data_dir` when relative.
    #[must_use]
    pub fn resolve_data_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

/// Where a collection's legacy entries come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractConfig {
    /// JSON dump file.
    File {
        path: PathBuf,
        #[serde(default)]
        layout: FileLayout,
        #[serde(default = "default_tag_field")]
        tag_field: String,
        /// Tags applied to every extracted entry.
        #[serde(default)]
        tags: Vec<String>,
    },
    /// Scrolled query against the legacy search cluster.
    Search {
        index: String,
        #[serde(default)]
        query: Option<serde_json::Value>,
        #[serde(default = "default_page_size")]
        page_size: u32,
        #[serde(default = "default_keep_alive")]
        keep_alive: String,
        #[serde(default = "default_tag_field")]
        tag_field: String,
        #[serde(default)]
        tags: Vec<String>,
    },
}

impl ExtractConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Search { .. } => "search",
        }
    }
}

/// Shape of a JSON dump file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLayout {
    /// Array of entry objects, optionally carrying nested `revisions`.
    #[default]
    Records,
    /// Object mapping a parent legacy id to its list of sub-records.
    Grouped,
}

fn default_tag_field() -> String {
    "980__a".to_string()
}

fn default_page_size() -> u32 {
    500
}

fn default_keep_alive() -> String {
    "5m".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformConfig {
    /// Models eligible for this collection. Empty means every registered model.
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadConfig {
    /// Treat records without an owner hint as manual-import cases.
    #[serde(default)]
    pub require_owner: bool,
}

/// Usage statistics replication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Collections whose migrated entities get their statistics replicated.
    pub collections: Vec<String>,
    pub event_types: BTreeMap<EventType, EventTypeConfig>,
    #[serde(default = "default_entity_field")]
    pub entity_field: String,
    #[serde(default)]
    pub event_type_field: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    #[serde(default = "default_page_size")]
    pub bulk_size: u32,
    /// Only replicate events at or before this instant.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub monthly_indices: bool,
    #[serde(default = "default_workers")]
    pub workers: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventTypeConfig {
    pub source_indices: Vec<String>,
    pub dest_index_prefix: String,
}

fn default_entity_field() -> String {
    "id_bibrec".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> u32 {
    1
}
