//! Bounded parallel statistics replication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use ferry_types::error::MigrationError;
use ferry_types::state::MigrationStateEntry;

use crate::errors::PipelineError;
use crate::stats::replicator::{PairReport, StatsReplicator, StatsReport, StatsTask};

/// `None` when the worker saw the abort flag and never started its pair.
type WorkerOutcome = (StatsTask, Option<Result<PairReport, MigrationError>>);

impl StatsReplicator {
    /// Replicate planned tasks on up to `workers` blocking workers, then
    /// reconcile.
    ///
    /// At most `workers` tasks are in flight; the next one is spawned only
    /// after a running one has been collected. Each worker owns its retry
    /// loop and runs inside a `stats_worker` span. Writes stay create-only,
    /// so results match the sequential path.
    ///
    /// # Errors
    ///
    /// The first collection-scoped worker error stops further spawning,
    /// raises the abort flag for queued workers, and is returned once the
    /// workers already running have drained. A panicked worker is an
    /// infrastructure error.
    pub async fn replicate_parallel(
        &self,
        entries: &[MigrationStateEntry],
        workers: usize,
    ) -> Result<StatsReport, PipelineError> {
        let tasks = self.plan(entries);
        let workers = workers.max(1);
        tracing::info!(entities = entries.len(), tasks = tasks.len(), workers, "Starting parallel statistics replication");

        let abort = Arc::new(AtomicBool::new(false));
        let mut join_set: JoinSet<Result<WorkerOutcome, JoinError>> = JoinSet::new();
        let mut pending = tasks.iter().cloned().enumerate();
        let mut report = StatsReport::default();
        let mut first_error: Option<PipelineError> = None;

        loop {
            while first_error.is_none() && join_set.len() < workers {
                let Some((index, task)) = pending.next() else {
                    break;
                };
                self.spawn_worker(&mut join_set, index, task, &abort);
            }
            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok((_, None))) => {}
                Ok(Ok((_, Some(Ok(pair))))) => report.pairs.push(pair),
                Ok(Ok((task, Some(Err(err))))) if err.is_entry_scoped() => {
                    tracing::warn!(legacy_id = task.legacy_id.as_str(), error = %err, "Skipping statistics for entity");
                    report.errors.push(err);
                }
                Ok(Ok((_, Some(Err(err))))) => {
                    tracing::error!(error = %err, "Statistics worker failed");
                    if first_error.is_none() {
                        first_error = Some(err.into());
                        abort.store(true, Ordering::SeqCst);
                        join_set.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                    // siblings cancelled after the first failure
                }
                Ok(Err(join_err)) | Err(join_err) => {
                    abort.store(true, Ordering::SeqCst);
                    join_set.abort_all();
                    return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                        "Statistics worker panicked: {join_err}"
                    )));
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let replicator = self.clone();
        tokio::task::spawn_blocking(move || {
            replicator
                .reconcile_all(&tasks, &mut report)
                .map(|()| report)
                .map_err(PipelineError::from)
        })
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("Reconciliation task panicked: {e}")))?
    }

    fn spawn_worker(
        &self,
        join_set: &mut JoinSet<Result<WorkerOutcome, JoinError>>,
        index: usize,
        task: StatsTask,
        abort: &Arc<AtomicBool>,
    ) {
        let replicator = self.clone();
        let abort = abort.clone();
        let span = tracing::info_span!(
            "stats_worker",
            index,
            event_type = %task.event_type,
            legacy_id = task.legacy_id.as_str(),
        );

        join_set.spawn(
            async move {
                let worker_span = tracing::Span::current();
                tokio::task::spawn_blocking(move || {
                    let _entered = worker_span.enter();
                    if abort.load(Ordering::SeqCst) {
                        tracing::debug!("Replication aborted before start");
                        return (task, None);
                    }
                    let result = replicator.replicate_pair(&task);
                    (task, Some(result))
                })
                .await
            }
            .instrument(span),
        );
    }
}
