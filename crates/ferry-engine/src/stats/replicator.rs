//! Sequential statistics replication with post-hoc count reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use ferry_types::entry::LegacyId;
use ferry_types::error::MigrationError;
use ferry_types::event::{BulkAction, EventType};
use ferry_types::state::MigrationStateEntry;

use crate::config::types::StatsConfig;
use crate::extract::ScrollSearch;
use crate::retry::RetryPolicy;
use crate::service::{EntityVersions, RecordService, SearchClient};
use crate::stats::query::{build_query, migrated_query};
use crate::stats::remap::{dest_index, parse_event, remap_event};

/// One unit of work: events of one entity and type from one legacy index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsTask {
    pub legacy_id: LegacyId,
    /// Destination parent id of the migrated entity.
    pub new_id: String,
    pub event_type: EventType,
    pub source_index: String,
    pub dest_index_prefix: String,
}

/// Counters for one replicated task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairReport {
    pub legacy_id: String,
    pub event_type: Option<EventType>,
    pub source_index: String,
    pub read: u64,
    pub created: u64,
    /// Create actions rejected because the id already existed.
    pub conflicts: u64,
    /// Events with no destination version to bind to.
    pub skipped: u64,
    /// Source hits that could not be parsed.
    pub malformed: u64,
    /// Actions the destination rejected for other reasons.
    pub failed: u64,
}

/// Legacy versus destination event counts for one entity and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub legacy_id: String,
    pub new_id: String,
    pub event_type: EventType,
    pub legacy_count: u64,
    pub dest_count: u64,
}

impl Reconciliation {
    #[must_use]
    pub fn matches(&self) -> bool {
        self.legacy_count == self.dest_count
    }
}

/// Result of a statistics replication pass.
#[derive(Debug, Clone, Default)]
pub struct StatsReport {
    pub pairs: Vec<PairReport>,
    pub reconciliations: Vec<Reconciliation>,
    /// Tasks abandoned on an entity-scoped error (e.g. unknown destination id).
    pub errors: Vec<MigrationError>,
}

impl StatsReport {
    #[must_use]
    pub fn created(&self) -> u64 {
        self.pairs.iter().map(|p| p.created).sum()
    }

    #[must_use]
    pub fn conflicts(&self) -> u64 {
        self.pairs.iter().map(|p| p.conflicts).sum()
    }

    #[must_use]
    pub fn read(&self) -> u64 {
        self.pairs.iter().map(|p| p.read).sum()
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &Reconciliation> {
        self.reconciliations.iter().filter(|r| !r.matches())
    }
}

/// Replicates usage events of migrated entities into the destination
/// statistics indices.
///
/// Writes are create-only with ids derived from the legacy event id, so
/// replaying the same window never duplicates events.
#[derive(Clone)]
pub struct StatsReplicator {
    source: Arc<dyn SearchClient>,
    dest: Arc<dyn SearchClient>,
    records: Arc<dyn RecordService>,
    config: StatsConfig,
    retry: RetryPolicy,
}

impl StatsReplicator {
    pub fn new(
        source: Arc<dyn SearchClient>,
        dest: Arc<dyn SearchClient>,
        records: Arc<dyn RecordService>,
        config: StatsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            dest,
            records,
            config,
            retry,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Every (source index, event type, entity) triple for `entries`.
    ///
    /// Only entities present in the state log are planned, so statistics
    /// never run ahead of record migration.
    #[must_use]
    pub fn plan(&self, entries: &[MigrationStateEntry]) -> Vec<StatsTask> {
        let mut tasks = Vec::new();
        for entry in entries {
            for (event_type, types) in &self.config.event_types {
                for index in &types.source_indices {
                    tasks.push(StatsTask {
                        legacy_id: entry.legacy_id.clone(),
                        new_id: entry.new_id.clone(),
                        event_type: *event_type,
                        source_index: index.clone(),
                        dest_index_prefix: types.dest_index_prefix.clone(),
                    });
                }
            }
        }
        tasks
    }

    fn versions(&self, new_id: &str) -> Result<EntityVersions, MigrationError> {
        self.retry.run("versions", || self.records.versions(new_id))
    }

    /// Copy the events of one task into the destination.
    ///
    /// # Errors
    ///
    /// Returns entity-scoped errors when the destination entity cannot be
    /// read, and collection-scoped errors when retries are exhausted.
    pub fn replicate_pair(&self, task: &StatsTask) -> Result<PairReport, MigrationError> {
        let mut report = PairReport {
            legacy_id: task.legacy_id.as_str().to_string(),
            event_type: Some(task.event_type),
            source_index: task.source_index.clone(),
            ..PairReport::default()
        };
        let versions = self
            .versions(&task.new_id)
            .map_err(|e| e.with_legacy_id(task.legacy_id.as_str()))?;

        let query = build_query(
            &self.config.entity_field,
            &task.legacy_id,
            self.config.event_type_field.as_deref(),
            task.event_type,
            self.config.before,
        );
        let hits = ScrollSearch::new(
            self.source.clone(),
            task.source_index.as_str(),
            query,
            self.config.page_size,
            self.config.keep_alive.as_str(),
            self.retry,
        );

        let bulk_size = self.config.bulk_size.max(1) as usize;
        let mut batch: Vec<BulkAction> = Vec::with_capacity(bulk_size);
        for hit in hits {
            let hit = hit?;
            report.read += 1;

            let event = match parse_event(&hit, task.event_type, &self.config.entity_field) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(index = hit.index.as_str(), id = hit.id.as_str(), error = %err, "Skipping malformed event");
                    report.malformed += 1;
                    continue;
                }
            };
            let Some(remapped) = remap_event(&event, &versions) else {
                report.skipped += 1;
                continue;
            };

            let index = dest_index(&task.dest_index_prefix, remapped.timestamp, self.config.monthly_indices);
            let source = serde_json::to_value(&remapped)
                .map_err(|e| MigrationError::internal("EVENT_ENCODE", e.to_string()))?;
            batch.push(BulkAction::create(index, remapped.id, source));
            if batch.len() >= bulk_size {
                self.flush(&mut batch, &mut report)?;
            }
        }
        self.flush(&mut batch, &mut report)?;

        tracing::info!(
            legacy_id = report.legacy_id.as_str(),
            event_type = %task.event_type,
            source_index = task.source_index.as_str(),
            read = report.read,
            created = report.created,
            conflicts = report.conflicts,
            skipped = report.skipped,
            "Replicated events"
        );
        Ok(report)
    }

    fn flush(&self, batch: &mut Vec<BulkAction>, report: &mut PairReport) -> Result<(), MigrationError> {
        if batch.is_empty() {
            return Ok(());
        }
        let response = self.retry.run("bulk", || self.dest.bulk(batch.as_slice()))?;
        report.created += response.created;
        report.conflicts += response.conflicts;
        report.failed += response.failed.len() as u64;
        for failure in &response.failed {
            tracing::warn!(
                id = failure.id.as_str(),
                status = failure.status,
                reason = failure.reason.as_str(),
                "Bulk create rejected"
            );
        }
        batch.clear();
        Ok(())
    }

    /// Compare legacy and migrated event counts for one entity and type.
    /// A mismatch is logged, never raised.
    ///
    /// # Errors
    ///
    /// Only count requests that exhaust their retries fail.
    pub fn reconcile(
        &self,
        legacy_id: &LegacyId,
        new_id: &str,
        event_type: EventType,
    ) -> Result<Reconciliation, MigrationError> {
        let Some(types) = self.config.event_types.get(&event_type) else {
            return Err(MigrationError::config(
                "UNKNOWN_EVENT_TYPE",
                format!("event type {event_type} is not configured"),
            ));
        };
        let legacy_query = build_query(
            &self.config.entity_field,
            legacy_id,
            self.config.event_type_field.as_deref(),
            event_type,
            self.config.before,
        );
        let mut legacy_count = 0;
        for index in &types.source_indices {
            legacy_count += self.retry.run("count", || self.source.count(index, &legacy_query))?;
        }
        let dest_pattern = format!("{}*", types.dest_index_prefix);
        let dest_query = migrated_query(new_id, event_type, self.config.before);
        let dest_count = self.retry.run("count", || self.dest.count(&dest_pattern, &dest_query))?;

        let reconciliation = Reconciliation {
            legacy_id: legacy_id.as_str().to_string(),
            new_id: new_id.to_string(),
            event_type,
            legacy_count,
            dest_count,
        };
        if reconciliation.matches() {
            tracing::debug!(legacy_id = legacy_id.as_str(), event_type = %event_type, count = legacy_count, "Event counts match");
        } else {
            tracing::warn!(
                legacy_id = legacy_id.as_str(),
                new_id,
                event_type = %event_type,
                legacy_count,
                dest_count,
                "Event count mismatch"
            );
        }
        Ok(reconciliation)
    }

    /// Reconcile every distinct entity and type covered by `tasks`.
    pub(crate) fn reconcile_all(
        &self,
        tasks: &[StatsTask],
        report: &mut StatsReport,
    ) -> Result<(), MigrationError> {
        let abandoned: BTreeSet<&str> = report
            .errors
            .iter()
            .filter_map(|e| e.legacy_id.as_deref())
            .collect();
        let mut seen = BTreeSet::new();
        for task in tasks {
            if abandoned.contains(task.legacy_id.as_str())
                || !seen.insert((task.legacy_id.clone(), task.event_type))
            {
                continue;
            }
            let reconciliation = self.reconcile(&task.legacy_id, &task.new_id, task.event_type)?;
            report.reconciliations.push(reconciliation);
        }
        Ok(())
    }

    /// Replicate every planned task one after another, then reconcile.
    ///
    /// # Errors
    ///
    /// Stops at the first collection-scoped error. Entity-scoped errors are
    /// collected in the report.
    pub fn replicate(&self, entries: &[MigrationStateEntry]) -> Result<StatsReport, MigrationError> {
        let tasks = self.plan(entries);
        tracing::info!(entities = entries.len(), tasks = tasks.len(), "Starting statistics replication");

        let mut report = StatsReport::default();
        for task in &tasks {
            match self.replicate_pair(task) {
                Ok(pair) => report.pairs.push(pair),
                Err(err) if err.is_entry_scoped() => {
                    tracing::warn!(legacy_id = task.legacy_id.as_str(), error = %err, "Skipping statistics for entity");
                    report.errors.push(err);
                }
                Err(err) => return Err(err),
            }
        }
        self.reconcile_all(&tasks, &mut report)?;
        Ok(report)
    }
}
