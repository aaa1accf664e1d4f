//! Migration orchestrator: resolves services, runs collections in order, and
//! drives statistics replication.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use ferry_state::StateBackend;
use ferry_types::error::MigrationError;
use ferry_types::state::CollectionName;

use crate::config::types::{CollectionConfig, ExtractConfig, MigrationConfig};
use crate::config::validator::validate_migration;
use crate::errors::PipelineError;
use crate::execution::ExecutionOptions;
use crate::resolve::{check_state_backend, create_state_backend, resolve_services};
use crate::result::{CheckResult, CollectionCheck, CollectionReport, RunSummary};
use crate::rules::catalog::builtin_registry;
use crate::rules::ModelRegistry;
use crate::runner::{run_collection, CollectionContext};
use crate::service::{RecordService, SearchClient};
use crate::stats::{StatsReplicator, StatsReport};

/// Owns the collaborators of one migration and runs its collections.
pub struct Orchestrator {
    config: MigrationConfig,
    state: Arc<dyn StateBackend>,
    records: Option<Arc<dyn RecordService>>,
    source_search: Option<Arc<dyn SearchClient>>,
    dest_search: Option<Arc<dyn SearchClient>>,
    registry: ModelRegistry,
}

/// Injected collaborators, for callers that bring their own service
/// clients.
#[derive(Default)]
pub struct Services {
    pub records: Option<Arc<dyn RecordService>>,
    pub source_search: Option<Arc<dyn SearchClient>>,
    pub dest_search: Option<Arc<dyn SearchClient>>,
}

fn registry_error(err: impl std::fmt::Display) -> PipelineError {
    MigrationError::internal("MODEL_REGISTRY", err.to_string()).into()
}

impl Orchestrator {
    /// Open the state database and build HTTP clients from `config`.
    ///
    /// # Errors
    ///
    /// Fails when the state database cannot be opened or the built-in model
    /// catalog is inconsistent.
    pub fn from_config(config: MigrationConfig) -> Result<Self, PipelineError> {
        let state = create_state_backend(&config)?;
        let services = resolve_services(&config);
        Self::with_services(
            config,
            state,
            Services {
                records: services.records,
                source_search: services.source_search,
                dest_search: services.dest_search,
            },
        )
    }

    /// Build an orchestrator around existing collaborators.
    ///
    /// # Errors
    ///
    /// Fails when the built-in model catalog is inconsistent.
    pub fn with_services(
        config: MigrationConfig,
        state: Arc<dyn StateBackend>,
        services: Services,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            config,
            state,
            records: services.records,
            source_search: services.source_search,
            dest_search: services.dest_search,
            registry: builtin_registry().map_err(registry_error)?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Run every selected collection in configuration order.
    ///
    /// A failed collection does not stop the others unless `fail_fast` is
    /// set. Per-collection failures are reported in the summary.
    ///
    /// # Errors
    ///
    /// Returns a config error when `options.collection` names no configured
    /// collection, or an infrastructure error when a collection task panics.
    pub async fn run(&self, options: &ExecutionOptions) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();
        if let Some(only) = &options.collection {
            if self.config.collection(only).is_none() {
                return Err(MigrationError::config(
                    "UNKNOWN_COLLECTION",
                    format!("collection '{only}' is not configured"),
                )
                .into());
            }
        }

        tracing::info!(
            migration = self.config.migration.as_str(),
            collections = self.config.collections.len(),
            dry_run = options.dry_run,
            "Starting migration"
        );

        let mut reports = Vec::new();
        for collection in self.config.collections.iter().filter(|c| options.selects(&c.name)) {
            let report = self.run_collection(collection, options).await?;
            let failed = report.failed();
            reports.push(report);
            if failed && self.config.fail_fast {
                tracing::warn!(
                    collection = collection.name.as_str(),
                    "fail_fast set, skipping remaining collections"
                );
                break;
            }
        }

        let summary = RunSummary {
            migration: self.config.migration.clone(),
            dry_run: options.dry_run,
            collections: reports,
            duration_secs: start.elapsed().as_secs_f64(),
        };
        tracing::info!(
            migration = summary.migration.as_str(),
            succeeded = summary.is_success(),
            failed = summary.failed().count(),
            duration_secs = summary.duration_secs,
            "Migration finished"
        );
        Ok(summary)
    }

    /// Run one collection on a blocking thread; every external call it makes
    /// is synchronous.
    async fn run_collection(
        &self,
        collection: &CollectionConfig,
        options: &ExecutionOptions,
    ) -> Result<CollectionReport, PipelineError> {
        let config = collection.clone();
        let registry = self.registry.clone();
        let state = self.state.clone();
        let records = self.records.clone();
        let source_search = self.source_search.clone();
        let retry = self.config.retry.policy();
        let options = options.clone();
        let name = collection.name.clone();

        tokio::task::spawn_blocking(move || {
            let ctx = CollectionContext {
                config: &config,
                registry: &registry,
                state: state.as_ref(),
                records: records.as_deref(),
                source_search,
                retry,
            };
            run_collection(&ctx, &options)
        })
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("Collection '{name}' task panicked: {e}"))
        })
    }

    /// Replicate usage statistics for every entity recorded in the state
    /// log of the configured statistics collections.
    ///
    /// `workers` overrides the configured worker count; more than one worker
    /// runs the parallel path.
    ///
    /// # Errors
    ///
    /// Returns a config error when the statistics section or a required
    /// service is missing, and the first collection-scoped replication
    /// error otherwise.
    pub async fn run_stats(&self, workers: Option<usize>) -> Result<StatsReport, PipelineError> {
        let missing = |what: &str| -> PipelineError {
            MigrationError::config("MISSING_STATS_SERVICE", format!("statistics need {what}")).into()
        };
        let stats = self
            .config
            .stats
            .clone()
            .ok_or_else(|| missing("a stats section"))?;
        let source = self.source_search.clone().ok_or_else(|| missing("source.url"))?;
        let dest = self
            .dest_search
            .clone()
            .ok_or_else(|| missing("destination.search_url"))?;
        let records = self.records.clone().ok_or_else(|| missing("a destination"))?;

        let mut entries = Vec::new();
        for name in &stats.collections {
            let found = self.state.entries(&CollectionName::new(name.as_str()))?;
            tracing::info!(collection = name.as_str(), entities = found.len(), "Loaded migrated entities");
            entries.extend(found);
        }

        let workers = workers.unwrap_or(stats.workers as usize).max(1);
        let replicator = StatsReplicator::new(source, dest, records, stats, self.config.retry.policy());
        let report = if workers > 1 {
            replicator.replicate_parallel(&entries, workers).await?
        } else {
            tokio::task::spawn_blocking(move || replicator.replicate(&entries))
                .await
                .map_err(|e| {
                    PipelineError::Infrastructure(anyhow::anyhow!("Statistics task panicked: {e}"))
                })??
        };

        tracing::info!(
            read = report.read(),
            created = report.created(),
            conflicts = report.conflicts(),
            skipped_entities = report.errors.len(),
            mismatches = report.mismatches().count(),
            "Statistics replication finished"
        );
        Ok(report)
    }
}

/// Validate a migration configuration, open its state database, and
/// resolve every collection's settings.
///
/// # Errors
///
/// Only an inconsistent built-in model catalog is an error; configuration
/// problems are reported in the result.
pub fn check_migration(config: &MigrationConfig) -> Result<CheckResult> {
    tracing::info!(migration = config.migration.as_str(), "Checking migration configuration");

    let mut problems = Vec::new();
    if let Err(e) = validate_migration(config) {
        problems.push(format!("{e}"));
    }
    let state_ok = check_state_backend(config);
    let registry = builtin_registry()?;

    let mut collections = Vec::new();
    for collection in &config.collections {
        let models = match registry.restrict(&collection.transform.models) {
            Ok(restricted) => restricted.models().iter().map(|m| m.name().to_string()).collect(),
            Err(e) => {
                problems.push(format!("collection '{}': {e}", collection.name));
                Vec::new()
            }
        };
        let source = match &collection.extract {
            ExtractConfig::File { path, .. } => {
                let resolved = collection.resolve_data_path(path);
                if !resolved.is_file() {
                    problems.push(format!(
                        "collection '{}': dump file {} not found",
                        collection.name,
                        resolved.display()
                    ));
                }
                resolved.display().to_string()
            }
            ExtractConfig::Search { index, .. } => index.clone(),
        };
        collections.push(CollectionCheck {
            name: collection.name.clone(),
            extract_kind: collection.extract.kind(),
            source,
            data_dir: collection.data_dir.clone(),
            tmp_dir: collection.tmp_dir.clone(),
            log_dir: collection.log_dir.clone(),
            models,
        });
    }

    Ok(CheckResult {
        state_ok,
        collections,
        problems,
    })
}
