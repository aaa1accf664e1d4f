//! Migration run result types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ferry_types::envelope::ErrorRecord;
use ferry_types::state::{RunStats, RunStatus};

use crate::journal::JournalSummary;

/// Result of one collection run.
#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub collection: String,
    pub status: RunStatus,
    pub stats: RunStats,
    /// State database run id; `None` for dry runs.
    pub run_id: Option<i64>,
    /// Skipped entities and items, plus the terminating error of a failed run.
    pub errors: Vec<ErrorRecord>,
    /// Unmapped legacy field codes with occurrence counts.
    pub unmapped: BTreeMap<String, u64>,
    /// Records that made it through transformation.
    pub transformed: u64,
    pub journal: Option<JournalSummary>,
    pub duration_secs: f64,
}

impl CollectionReport {
    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Terminating error message of a failed run.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.stats.error_message.as_deref()
    }
}

/// Result of a migration run over one or more collections.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub migration: String,
    pub dry_run: bool,
    pub collections: Vec<CollectionReport>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Collections whose run ended in `Failed`.
    pub fn failed(&self) -> impl Iterator<Item = &CollectionReport> {
        self.collections.iter().filter(|c| c.failed())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == name)
    }
}

/// Resolved settings of one collection, reported by a config check.
#[derive(Debug, Clone)]
pub struct CollectionCheck {
    pub name: String,
    pub extract_kind: &'static str,
    /// Dump file for file extraction, index name for search extraction.
    pub source: String,
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub models: Vec<String>,
}

/// Result of a configuration check.
#[derive(Debug)]
pub struct CheckResult {
    pub state_ok: bool,
    pub collections: Vec<CollectionCheck>,
    pub problems: Vec<String>,
}

impl CheckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.state_ok && self.problems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, status: RunStatus) -> CollectionReport {
        CollectionReport {
            collection: name.into(),
            status,
            stats: RunStats::default(),
            run_id: None,
            errors: Vec::new(),
            unmapped: BTreeMap::new(),
            transformed: 0,
            journal: None,
            duration_secs: 0.0,
        }
    }

    #[test]
    fn test_summary_reports_failed_collections() {
        let summary = RunSummary {
            migration: "m".into(),
            collections: vec![
                report("books", RunStatus::Completed),
                report("videos", RunStatus::Failed),
            ],
            ..RunSummary::default()
        };
        assert!(!summary.is_success());
        let failed: Vec<_> = summary.failed().map(|c| c.collection.as_str()).collect();
        assert_eq!(failed, vec!["videos"]);
        assert!(summary.collection("books").is_some());
    }

    #[test]
    fn test_empty_summary_is_success() {
        assert!(RunSummary::default().is_success());
    }
}
