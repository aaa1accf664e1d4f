//! Structured error model for migration operations.
//!
//! [`MigrationError`] carries classification, propagation scope, retry
//! metadata, and the legacy context needed for manual triage. Construct via
//! category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a migration error.
///
/// Determines default retry behavior and how the error is reported in the
/// error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid migration configuration.
    Config,
    /// No transform model matches the entry.
    Unroutable,
    /// A field handler rejected a legacy value.
    FieldTransform,
    /// Content that needs a human to import it.
    ManualImport,
    /// Owner identity could not be resolved or created.
    Identity,
    /// Transient network error (retryable).
    TransientNetwork,
    /// Transient storage error (retryable).
    TransientStorage,
    /// Malformed or inconsistently typed source document.
    Malformed,
    /// Destination rejected the data.
    Data,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Unroutable => "unroutable",
            Self::FieldTransform => "field_transform",
            Self::ManualImport => "manual_import",
            Self::Identity => "identity",
            Self::TransientNetwork => "transient_network",
            Self::TransientStorage => "transient_storage",
            Self::Malformed => "malformed",
            Self::Data => "data",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Aborts the collection run.
    Collection,
    /// Skips one legacy entity.
    Entry,
    /// Skips one item of a batch (a search hit, a file record).
    Item,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collection => "collection",
            Self::Entry => "entry",
            Self::Item => "item",
        };
        f.write_str(s)
    }
}

/// Triage priority for content that must be imported by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Parse a priority label, falling back to `Medium` for unknown input.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Structured error from a migration operation.
///
/// Carries classification, retry metadata, and optional legacy context.
/// Construct via category-specific factory methods (e.g., [`MigrationError::config`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct MigrationError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MigrationError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            legacy_id: None,
            field: None,
            raw_value: None,
            priority: None,
            details: None,
        }
    }

    /// Configuration error (not retryable, aborts the collection).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Collection, false, code, message)
    }

    /// No model matched the entry (entry is skipped).
    #[must_use]
    pub fn unroutable(legacy_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unroutable, ErrorScope::Entry, false, "UNROUTABLE", message)
            .with_legacy_id(legacy_id)
    }

    /// A field handler rejected a value (entry is skipped).
    #[must_use]
    pub fn field_transform(
        legacy_id: impl Into<String>,
        field: impl Into<String>,
        raw_value: serde_json::Value,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCategory::FieldTransform,
            ErrorScope::Entry,
            false,
            "FIELD_TRANSFORM",
            message,
        )
        .with_legacy_id(legacy_id);
        err.field = Some(field.into());
        err.raw_value = Some(raw_value);
        err
    }

    /// Content that needs manual handling (entry is skipped).
    #[must_use]
    pub fn manual_import(
        code: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
    ) -> Self {
        let mut err = Self::new(ErrorCategory::ManualImport, ErrorScope::Entry, false, code, message);
        err.priority = Some(priority);
        err
    }

    /// Identity resolution failure (entry is skipped).
    #[must_use]
    pub fn identity(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Identity, ErrorScope::Entry, false, code, message)
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, ErrorScope::Collection, true, code, message)
    }

    /// Transient storage error (retryable).
    #[must_use]
    pub fn transient_storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientStorage, ErrorScope::Collection, true, code, message)
    }

    /// Malformed source item (only that item is skipped).
    #[must_use]
    pub fn malformed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Malformed, ErrorScope::Item, false, code, message)
    }

    /// Destination rejected the data for one entity.
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, ErrorScope::Entry, false, code, message)
    }

    /// Internal error (aborts the collection).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Collection, false, code, message)
    }

    /// Attach the legacy id of the entity the error relates to.
    #[must_use]
    pub fn with_legacy_id(mut self, legacy_id: impl Into<String>) -> Self {
        self.legacy_id = Some(legacy_id.into());
        self
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Ask the retry loop to wait this long before the next attempt.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    /// Mark a retryable error as exhausted: no longer retryable and fatal
    /// for the collection run.
    #[must_use]
    pub fn exhausted(mut self, attempts: u32) -> Self {
        self.retryable = false;
        self.scope = ErrorScope::Collection;
        self.message = format!("{} (gave up after {attempts} attempts)", self.message);
        self
    }

    /// Returns `true` when the surrounding run can continue past this error.
    #[must_use]
    pub fn is_entry_scoped(&self) -> bool {
        matches!(self.scope, ErrorScope::Entry | ErrorScope::Item)
    }
}
