//! Core orchestration crate for ferry legacy-repository migrations.

pub mod config;
pub(crate) mod error_log;
pub mod errors;
pub mod execution;
pub mod extract;
pub mod http;
pub mod journal;
pub mod load;
pub mod orchestrator;
pub(crate) mod resolve;
pub mod result;
pub mod retry;
pub mod revisions;
pub mod rules;
pub mod runner;
pub mod service;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;
pub mod transform;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use execution::ExecutionOptions;
pub use orchestrator::{check_migration, Orchestrator, Services};
pub use result::{CheckResult, CollectionReport, RunSummary};
pub use stats::StatsReport;
