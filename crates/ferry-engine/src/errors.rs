//! Pipeline error model and retry delay helpers.

use std::time::Duration;

use ferry_types::error::MigrationError;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for abort decisions
// ---------------------------------------------------------------------------

/// Error that ends a collection run.
///
/// `Migration` wraps a typed `MigrationError` with scope and retry metadata.
///
/// `Infrastructure` wraps opaque host-side errors (state database, journal
/// files, scratch directories) that are never retryable.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed migration error.
    Migration(MigrationError),
    /// Infrastructure error (state backend, file system, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migration(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<MigrationError> for PipelineError {
    fn from(e: MigrationError) -> Self {
        Self::Migration(e)
    }
}

impl From<ferry_state::StateError> for PipelineError {
    fn from(e: ferry_state::StateError) -> Self {
        Self::Infrastructure(e.into())
    }
}

impl PipelineError {
    /// Returns `true` if this is a typed error still marked retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Migration(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed migration error if this is a `Migration` variant.
    pub fn as_migration_error(&self) -> Option<&MigrationError> {
        match self {
            Self::Migration(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}

/// Delay before the next attempt: the error's own hint, else the fixed delay.
pub(crate) fn retry_delay(err: &MigrationError, fixed: Duration) -> Duration {
    err.retry_after_ms.map_or(fixed, Duration::from_millis)
}
