//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for run history, the
//! append-only migration state log, and the error log. Model types live in
//! [`ferry_types::state`].

use ferry_types::entry::LegacyId;
use ferry_types::envelope::ErrorRecord;
use ferry_types::state::{CollectionName, MigrationStateEntry, RunStats, RunStatus};

use crate::error;

/// Storage contract for migration state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Begin a new collection run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, collection: &CollectionName) -> error::Result<i64>;

    /// Finalize a collection run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Most recent state entry recorded for a legacy id, across all runs.
    ///
    /// Returns `Ok(None)` when the entity was never migrated.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn find_entry(
        &self,
        collection: &CollectionName,
        legacy_id: &LegacyId,
    ) -> error::Result<Option<MigrationStateEntry>>;

    /// Append a state entry for `run_id`.
    ///
    /// Returns `false` without writing when the run already holds an entry
    /// for this legacy id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn append_entry(&self, run_id: i64, entry: &MigrationStateEntry) -> error::Result<bool>;

    /// Newest entry per legacy id for a collection, ordered by legacy id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn entries(&self, collection: &CollectionName) -> error::Result<Vec<MigrationStateEntry>>;

    /// Persist error-log records. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_error_records(&self, run_id: i64, records: &[ErrorRecord]) -> error::Result<u64>;
}
