//! Usage-statistics replication for migrated entities.

pub mod parallel;
pub mod query;
pub mod remap;
pub mod replicator;

pub use replicator::{PairReport, Reconciliation, StatsReplicator, StatsReport, StatsTask};
