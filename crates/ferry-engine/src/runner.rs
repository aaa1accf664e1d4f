//! Single-collection pipeline: extract, route and transform, reconcile
//! revisions, load, and finalize run state and journal.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use ferry_state::StateBackend;
use ferry_types::entry::{LegacyEntry, TransformedRecord};
use ferry_types::envelope::ErrorRecord;
use ferry_types::error::MigrationError;
use ferry_types::state::{CollectionName, EntryStatus, RunStats, RunStatus};

use crate::config::types::{CollectionConfig, ExtractConfig};
use crate::errors::PipelineError;
use crate::execution::ExecutionOptions;
use crate::extract::{coalesce_revisions, EntryStream, FileExtractor, ScrollSearch, SearchExtractor};
use crate::journal::Journal;
use crate::load::Loader;
use crate::result::CollectionReport;
use crate::retry::RetryPolicy;
use crate::revisions::Reconciler;
use crate::rules::ModelRegistry;
use crate::service::{RecordService, SearchClient};
use crate::transform::Transformer;

/// Lifecycle of one collection run.
///
/// Entries stream through `Extracting -> Transforming -> Loading` one at a
/// time, so the middle stages cycle until the extractor runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configured,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::{Completed, Configured, Extracting, Failed, Loading, Transforming};
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Configured | Transforming | Loading, Extracting)
            | (Extracting, Transforming | Completed)
            | (Transforming, Loading) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators for one collection run.
pub struct CollectionContext<'a> {
    pub config: &'a CollectionConfig,
    pub registry: &'a ModelRegistry,
    pub state: &'a dyn StateBackend,
    /// Destination service; `None` only works for dry runs.
    pub records: Option<&'a dyn RecordService>,
    /// Legacy search cluster, needed by search extraction.
    pub source_search: Option<Arc<dyn SearchClient>>,
    pub retry: RetryPolicy,
}

struct CollectionRun<'a, 'c> {
    ctx: &'c CollectionContext<'a>,
    options: &'c ExecutionOptions,
    collection: CollectionName,
    run_id: Option<i64>,
    stage: Stage,
    stats: RunStats,
    errors: Vec<ErrorRecord>,
    transformer: Transformer,
    transformed: u64,
    journal: Option<Journal>,
}

/// Run one collection to a terminal stage.
///
/// Never panics on pipeline errors: a failed run is reported with
/// `RunStatus::Failed` after its error records, run row, and journal have
/// been flushed.
pub fn run_collection(ctx: &CollectionContext<'_>, options: &ExecutionOptions) -> CollectionReport {
    let start = Instant::now();
    let mut run = CollectionRun {
        ctx,
        options,
        collection: CollectionName::new(ctx.config.name.as_str()),
        run_id: None,
        stage: Stage::Configured,
        stats: RunStats::default(),
        errors: Vec::new(),
        transformer: Transformer::new(),
        transformed: 0,
        journal: None,
    };

    tracing::info!(
        collection = run.collection.as_str(),
        extract = ctx.config.extract.kind(),
        dry_run = options.dry_run,
        "Starting collection run"
    );

    let result = run.execute();
    run.finalize(result, start)
}

impl CollectionRun<'_, '_> {
    fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        if !self.stage.can_advance_to(next) {
            return Err(MigrationError::internal(
                "INVALID_STAGE_TRANSITION",
                format!("cannot move from {} to {next}", self.stage),
            )
            .into());
        }
        tracing::trace!(collection = self.collection.as_str(), from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        Ok(())
    }

    fn execute(&mut self) -> Result<(), PipelineError> {
        let ctx = self.ctx;
        let config = ctx.config;

        let registry = ctx
            .registry
            .restrict(&config.transform.models)
            .map_err(|e| MigrationError::config("UNKNOWN_MODEL", e.to_string()))?;
        let records = match (ctx.records, self.options.dry_run) {
            (_, true) => None,
            (Some(records), false) => Some(records),
            (None, false) => {
                return Err(MigrationError::config(
                    "MISSING_DESTINATION",
                    "a destination is required unless running with --dry-run",
                )
                .into())
            }
        };

        if !self.options.dry_run {
            self.run_id = Some(ctx.state.start_run(&self.collection)?);
        }
        self.journal = Some(Journal::create(&config.tmp_dir, &config.log_dir, self.run_id)?);

        let mut loader = match (records, self.run_id) {
            (Some(records), Some(run_id)) => Some(
                Loader::new(self.collection.clone(), run_id, ctx.state, records, ctx.retry)
                    .require_owner(config.load.require_owner),
            ),
            _ => None,
        };

        self.advance(Stage::Extracting)?;
        let entries = coalesce_revisions(open_extractor(ctx)?);
        let mut processed = 0u64;

        for item in entries {
            if self.options.limit.is_some_and(|limit| processed >= limit) {
                tracing::info!(collection = self.collection.as_str(), processed, "Entry limit reached");
                break;
            }
            processed += 1;
            self.stats.entries_read += 1;

            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    self.skip(err)?;
                    continue;
                }
            };

            self.advance(Stage::Transforming)?;
            let record = match self.transform(&registry, &entry) {
                Ok(record) => record,
                Err(err) => {
                    self.skip(err)?;
                    self.advance(Stage::Extracting)?;
                    continue;
                }
            };
            self.transformed += 1;

            let Some(loader) = loader.as_mut() else {
                self.journal_mut()?.record_preview(&record)?;
                self.advance(Stage::Extracting)?;
                continue;
            };

            self.advance(Stage::Loading)?;
            match loader.load(&record) {
                Ok(state_entry) => {
                    match state_entry.status {
                        EntryStatus::Migrated => self.stats.entries_migrated += 1,
                        EntryStatus::AlreadyMigrated => self.stats.entries_already_migrated += 1,
                    }
                    self.journal_mut()?.record_entry(&state_entry)?;
                }
                Err(err) => self.skip(err)?,
            }
            self.advance(Stage::Extracting)?;
        }

        self.advance(Stage::Completed)
    }

    /// Route `entry`, transform every revision, and keep the latest.
    fn transform(
        &mut self,
        registry: &ModelRegistry,
        entry: &LegacyEntry,
    ) -> Result<TransformedRecord, MigrationError> {
        let model = registry.route(entry)?;
        let mut reconciler = Reconciler::new(entry.id.clone());
        for revision in self.transformer.revisions(entry, model)? {
            reconciler.push(revision)?;
        }
        reconciler.finish().map(|r| r.payload).ok_or_else(|| {
            MigrationError::malformed("NO_REVISIONS", "entry carries no revisions")
                .with_legacy_id(entry.id.as_str())
        })
    }

    /// Record an entity- or item-scoped error and move on. Anything wider
    /// is returned to end the run.
    fn skip(&mut self, err: MigrationError) -> Result<(), PipelineError> {
        if !err.is_entry_scoped() {
            return Err(err.into());
        }
        tracing::warn!(
            collection = self.collection.as_str(),
            legacy_id = err.legacy_id.as_deref(),
            category = %err.category,
            code = err.code.as_str(),
            field = err.field.as_deref(),
            "Skipping entry: {}",
            err.message
        );
        self.stats.entries_skipped += 1;
        let record = ErrorRecord::from_error(self.collection.as_str(), &err);
        self.journal_mut()?.record_error(&record)?;
        self.errors.push(record);
        Ok(())
    }

    fn journal_mut(&mut self) -> Result<&mut Journal, PipelineError> {
        self.journal.as_mut().ok_or_else(|| {
            MigrationError::internal("NO_JOURNAL", "journal used before it was opened").into()
        })
    }

    fn finalize(mut self, result: Result<(), PipelineError>, start: Instant) -> CollectionReport {
        let mut failure = result.err();

        if let Some(err) = &failure {
            self.stage = Stage::Failed;
            self.stats.error_message = Some(err.to_string());
            if let Some(migration_err) = err.as_migration_error() {
                let record = ErrorRecord::from_error(self.collection.as_str(), migration_err);
                if let Some(journal) = self.journal.as_mut() {
                    if let Err(e) = journal.record_error(&record) {
                        tracing::error!(collection = self.collection.as_str(), error = %e, "Failed to journal terminating error");
                    }
                }
                self.errors.push(record);
            }
        }

        if let Some(run_id) = self.run_id {
            crate::error_log::persist_error_records(self.ctx.state, &self.collection, run_id, &self.errors);
        }

        let journal = self
            .journal
            .take()
            .map(|journal| journal.finish(self.transformer.unmapped()))
            .transpose();
        let journal = match journal {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(collection = self.collection.as_str(), error = %e, "Failed to flush run journal");
                if failure.is_none() {
                    self.stats.error_message = Some(format!("{e:#}"));
                    failure = Some(PipelineError::Infrastructure(e));
                }
                None
            }
        };

        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        if let Some(run_id) = self.run_id {
            if let Err(e) = self.ctx.state.complete_run(run_id, status, &self.stats) {
                tracing::error!(collection = self.collection.as_str(), run_id, error = %e, "Failed to complete run");
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        match &failure {
            None => tracing::info!(
                collection = self.collection.as_str(),
                read = self.stats.entries_read,
                migrated = self.stats.entries_migrated,
                already_migrated = self.stats.entries_already_migrated,
                skipped = self.stats.entries_skipped,
                unmapped_fields = self.transformer.unmapped().len(),
                duration_secs,
                "Collection run completed"
            ),
            Some(err) => tracing::error!(
                collection = self.collection.as_str(),
                read = self.stats.entries_read,
                skipped = self.stats.entries_skipped,
                retryable = err.is_retryable(),
                "Collection run failed: {err}"
            ),
        }

        CollectionReport {
            collection: self.collection.as_str().to_string(),
            status,
            stats: self.stats,
            run_id: self.run_id,
            errors: self.errors,
            unmapped: self.transformer.unmapped().clone(),
            transformed: self.transformed,
            journal,
            duration_secs,
        }
    }
}

fn open_extractor(ctx: &CollectionContext<'_>) -> Result<EntryStream<'static>, MigrationError> {
    match &ctx.config.extract {
        ExtractConfig::File {
            path,
            layout,
            tag_field,
            tags,
        } => {
            let path = ctx.config.resolve_data_path(path);
            Ok(Box::new(FileExtractor::open(&path, *layout, tag_field, tags.clone())?))
        }
        ExtractConfig::Search {
            index,
            query,
            page_size,
            keep_alive,
            tag_field,
            tags,
        } => {
            let client = ctx.source_search.clone().ok_or_else(|| {
                MigrationError::config(
                    "MISSING_SOURCE",
                    format!("collection '{}' extracts from search but no source is configured", ctx.config.name),
                )
            })?;
            let query = query.clone().unwrap_or_else(|| json!({ "match_all": {} }));
            let scroll = ScrollSearch::new(client, index.as_str(), query, *page_size, keep_alive.as_str(), ctx.retry);
            Ok(Box::new(SearchExtractor::new(scroll, tag_field, tags.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{FileLayout, LoadConfig, TransformConfig};
    use crate::rules::catalog::builtin_registry;
    use crate::testing::FakeRecords;
    use ferry_state::SqliteStateBackend;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    fn collection(root: &Path, dump: &str) -> CollectionConfig {
        let data_dir = root.join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let mut file = std::fs::File::create(data_dir.join("dump.json")).unwrap();
        file.write_all(dump.as_bytes()).unwrap();
        CollectionConfig {
            name: "books".into(),
            data_dir,
            tmp_dir: root.join("tmp"),
            log_dir: root.join("logs"),
            extract: ExtractConfig::File {
                path: "dump.json".into(),
                layout: FileLayout::Records,
                tag_field: "980__a".into(),
                tags: vec![],
            },
            transform: TransformConfig::default(),
            load: LoadConfig::default(),
        }
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Configured.can_advance_to(Stage::Extracting));
        assert!(Stage::Extracting.can_advance_to(Stage::Transforming));
        assert!(Stage::Transforming.can_advance_to(Stage::Loading));
        assert!(Stage::Transforming.can_advance_to(Stage::Extracting));
        assert!(Stage::Loading.can_advance_to(Stage::Extracting));
        assert!(Stage::Extracting.can_advance_to(Stage::Completed));
        assert!(Stage::Loading.can_advance_to(Stage::Failed));
        assert!(!Stage::Configured.can_advance_to(Stage::Loading));
        assert!(!Stage::Loading.can_advance_to(Stage::Completed));
        assert!(!Stage::Completed.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Extracting));
    }

    #[test]
    fn test_run_skips_bad_entries_and_completes() {
        let root = tempfile::tempdir().unwrap();
        let config = collection(
            root.path(),
            r#"[
                {"recid": 1, "980__a": "BOOK", "245__a": "Dune", "020__a": "ISBN123"},
                {"recid": 2, "980__a": "UNKNOWN"},
                "garbage",
                {"recid": 3, "980__a": "BOOK", "260__c": "19xx"}
            ]"#,
        );
        let registry = builtin_registry().unwrap();
        let state = SqliteStateBackend::in_memory().unwrap();
        let records = FakeRecords::default();
        let ctx = CollectionContext {
            config: &config,
            registry: &registry,
            state: &state,
            records: Some(&records),
            source_search: None,
            retry: RetryPolicy::new(2, Duration::ZERO),
        };

        let report = run_collection(&ctx, &ExecutionOptions::default());
        assert_eq!(report.status, RunStatus::Completed, "{:?}", report.failure());
        assert_eq!(report.stats.entries_read, 4);
        assert_eq!(report.stats.entries_migrated, 1);
        assert_eq!(report.stats.entries_skipped, 3);
        // malformed items surface ahead of the entry the coalescer is holding
        let codes: Vec<_> = report.errors.iter().map(|e| e.error_code.as_str()).collect();
        assert_eq!(codes, vec!["NOT_AN_OBJECT", "UNROUTABLE", "FIELD_TRANSFORM"]);
        assert_eq!(records.record_count(), 1);
        assert!(root.path().join("logs").join(crate::journal::ERROR_LOG).exists());
        assert_eq!(std::fs::read_dir(root.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_clean_run_writes_state_and_error_logs() {
        let root = tempfile::tempdir().unwrap();
        let config = collection(root.path(), r#"[{"recid": 1, "980__a": "BOOK", "245__a": "Dune"}]"#);
        let registry = builtin_registry().unwrap();
        let state = SqliteStateBackend::in_memory().unwrap();
        let records = FakeRecords::default();
        let ctx = CollectionContext {
            config: &config,
            registry: &registry,
            state: &state,
            records: Some(&records),
            source_search: None,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };

        let report = run_collection(&ctx, &ExecutionOptions::default());
        assert_eq!(report.status, RunStatus::Completed, "{:?}", report.failure());
        assert_eq!(report.stats.entries_migrated, 1);
        assert!(report.errors.is_empty());

        let logs = root.path().join("logs");
        let state_log = std::fs::read_to_string(logs.join(crate::journal::STATE_LOG)).unwrap();
        assert_eq!(state_log.lines().count(), 1);
        let error_log = std::fs::read_to_string(logs.join(crate::journal::ERROR_LOG)).unwrap();
        assert!(error_log.is_empty());
    }

    #[test]
    fn test_missing_dump_fails_run_but_flushes_journal() {
        let root = tempfile::tempdir().unwrap();
        let mut config = collection(root.path(), "[]");
        config.extract = ExtractConfig::File {
            path: "missing.json".into(),
            layout: FileLayout::Records,
            tag_field: "980__a".into(),
            tags: vec![],
        };
        let registry = builtin_registry().unwrap();
        let state = SqliteStateBackend::in_memory().unwrap();
        let records = FakeRecords::default();
        let ctx = CollectionContext {
            config: &config,
            registry: &registry,
            state: &state,
            records: Some(&records),
            source_search: None,
            retry: RetryPolicy::new(1, Duration::ZERO),
        };

        let report = run_collection(&ctx, &ExecutionOptions::default());
        assert!(report.failed());
        assert!(report.failure().unwrap().contains("DUMP_UNREADABLE"));
        assert!(report.run_id.is_some());
        let errors = std::fs::read_to_string(root.path().join("logs").join(crate::journal::ERROR_LOG)).unwrap();
        assert!(errors.contains("DUMP_UNREADABLE"));
        assert_eq!(std::fs::read_dir(root.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_non_dry_run_requires_destination() {
        let root = tempfile::tempdir().unwrap();
        let config = collection(root.path(), "[]");
        let registry = builtin_registry().unwrap();
        let state = SqliteStateBackend::in_memory().unwrap();
        let ctx = CollectionContext {
            config: &config,
            registry: &registry,
            state: &state,
            records: None,
            source_search: None,
            retry: RetryPolicy::default(),
        };
        let report = run_collection(&ctx, &ExecutionOptions::default());
        assert!(report.failed());
        assert!(report.failure().unwrap().contains("MISSING_DESTINATION"));
        assert!(report.run_id.is_none());
    }
}
