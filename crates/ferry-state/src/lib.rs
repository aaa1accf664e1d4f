//! Durable migration state for the ferry engine.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for run history, the append-only migration state log
//! (legacy id to new id/version), and the error log.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for state backend users.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::sqlite::SqliteStateBackend;
    pub use ferry_types::state::{
        CollectionName, EntryStatus, MigrationStateEntry, RunStats, RunStatus,
    };
}
