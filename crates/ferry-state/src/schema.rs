//! DDL for the `SQLite` state database.

/// Idempotent DDL for state tables.
///
/// `migration_state` is append-only: one row per entity per run, unique on
/// `(run_id, collection, legacy_id)`. The newest row for a legacy id is the
/// authoritative mapping.
pub const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS migration_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    entries_read INTEGER DEFAULT 0,
    entries_migrated INTEGER DEFAULT 0,
    entries_already_migrated INTEGER DEFAULT 0,
    entries_skipped INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS migration_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES migration_runs(id),
    collection TEXT NOT NULL,
    legacy_id TEXT NOT NULL,
    new_id TEXT NOT NULL,
    new_version TEXT NOT NULL,
    status TEXT NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (run_id, collection, legacy_id)
);

CREATE INDEX IF NOT EXISTS idx_state_legacy ON migration_state (collection, legacy_id);

CREATE TABLE IF NOT EXISTS error_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES migration_runs(id),
    collection TEXT NOT NULL,
    legacy_id TEXT,
    field TEXT,
    raw_value TEXT,
    error_code TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_category TEXT NOT NULL,
    priority TEXT,
    failed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_error_log_run ON error_log (collection, run_id);
";
