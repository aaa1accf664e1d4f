//! Error-log persistence helper used by the runner.

use ferry_state::StateBackend;
use ferry_types::envelope::ErrorRecord;
use ferry_types::state::CollectionName;

/// Persist collected error records to the state backend.
///
/// Failures are logged, never raised: the journal still carries the records.
pub(crate) fn persist_error_records(
    state_backend: &dyn StateBackend,
    collection: &CollectionName,
    run_id: i64,
    records: &[ErrorRecord],
) {
    if records.is_empty() {
        return;
    }

    let error_count = records.len();

    match state_backend.insert_error_records(run_id, records) {
        Ok(inserted) => {
            tracing::info!(
                collection = collection.as_str(),
                error_records = inserted,
                "Persisted error records to state backend"
            );
        }
        Err(e) => {
            tracing::error!(
                collection = collection.as_str(),
                error_count,
                error = %e,
                "Failed to persist error records"
            );
        }
    }
}
