//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ferry_types::entry::LegacyId;
use ferry_types::envelope::ErrorRecord;
use ferry_types::state::{CollectionName, EntryStatus, MigrationStateEntry, RunStats, RunStatus};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::StateBackend;
use crate::error::{self, StateError};
use crate::schema::CREATE_TABLES;

type EntryRow = (String, String, String, String, String);

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing and dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn entry_from_row(row: EntryRow) -> error::Result<MigrationStateEntry> {
        let (collection, legacy_id, new_id, new_version, status) = row;
        let status = EntryStatus::parse(&status)
            .ok_or_else(|| StateError::Corrupt(format!("unknown entry status '{status}'")))?;
        Ok(MigrationStateEntry {
            collection: CollectionName::new(collection),
            legacy_id: LegacyId::new(legacy_id),
            new_id,
            new_version,
            status,
        })
    }

    #[cfg(test)]
    fn get_run_row(&self, run_id: i64) -> error::Result<(String, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT status, entries_read, finished_at, error_message FROM migration_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?)
    }

    #[cfg(test)]
    fn count_state_rows(&self, collection: &str, legacy_id: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM migration_state WHERE collection = ?1 AND legacy_id = ?2",
            rusqlite::params![collection, legacy_id],
            |row| row.get(0),
        )?)
    }

    #[cfg(test)]
    fn first_error_field(&self, run_id: i64) -> error::Result<(Option<String>, String)> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT field, error_message FROM error_log WHERE run_id = ?1 ORDER BY id LIMIT 1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }
}

impl StateBackend for SqliteStateBackend {
    fn start_run(&self, collection: &CollectionName) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_runs (collection, status) VALUES (?1, ?2)",
            rusqlite::params![collection.as_str(), RunStatus::Running.as_str()],
        )
        .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE migration_runs SET status = ?1, finished_at = datetime('now'), \
             entries_read = ?2, entries_migrated = ?3, entries_already_migrated = ?4, \
             entries_skipped = ?5, error_message = ?6 \
             WHERE id = ?7",
            rusqlite::params![
                status.as_str(),
                stats.entries_read as i64,
                stats.entries_migrated as i64,
                stats.entries_already_migrated as i64,
                stats.entries_skipped as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(|e| StateError::backend_context("complete_run", e))?;
        Ok(())
    }

    fn find_entry(
        &self,
        collection: &CollectionName,
        legacy_id: &LegacyId,
    ) -> error::Result<Option<MigrationStateEntry>> {
        let conn = self.lock_conn()?;
        let row: Option<EntryRow> = conn
            .query_row(
                "SELECT collection, legacy_id, new_id, new_version, status \
                 FROM migration_state WHERE collection = ?1 AND legacy_id = ?2 \
                 ORDER BY id DESC LIMIT 1",
                rusqlite::params![collection.as_str(), legacy_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(|e| StateError::backend_context("find_entry", e))?;
        row.map(Self::entry_from_row).transpose()
    }

    fn append_entry(&self, run_id: i64, entry: &MigrationStateEntry) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO migration_state \
                 (run_id, collection, legacy_id, new_id, new_version, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    run_id,
                    entry.collection.as_str(),
                    entry.legacy_id.as_str(),
                    entry.new_id,
                    entry.new_version,
                    entry.status.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("append_entry", e))?;
        Ok(rows > 0)
    }

    fn entries(&self, collection: &CollectionName) -> error::Result<Vec<MigrationStateEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT s.collection, s.legacy_id, s.new_id, s.new_version, s.status \
                 FROM migration_state s \
                 JOIN (SELECT MAX(id) AS id FROM migration_state \
                       WHERE collection = ?1 GROUP BY legacy_id) latest \
                 ON s.id = latest.id \
                 ORDER BY s.legacy_id",
            )
            .map_err(|e| StateError::backend_context("entries: prepare", e))?;
        let rows = stmt
            .query_map([collection.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .map_err(|e| StateError::backend_context("entries: query", e))?
            .collect::<Result<Vec<EntryRow>, _>>()
            .map_err(|e| StateError::backend_context("entries: read", e))?;
        rows.into_iter().map(Self::entry_from_row).collect()
    }

    fn insert_error_records(&self, run_id: i64, records: &[ErrorRecord]) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_error_records: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO error_log \
                 (run_id, collection, legacy_id, field, raw_value, error_code, error_message, \
                  error_category, priority, failed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .map_err(|e| StateError::backend_context("insert_error_records: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                run_id,
                record.collection,
                record.legacy_id,
                record.field,
                record.raw_value,
                record.error_code,
                record.error_message,
                record.error_category.to_string(),
                record.priority.map(|p| p.to_string()),
                record.failed_at.as_str(),
            ])
            .map_err(|e| StateError::backend_context("insert_error_records: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_error_records: commit", e))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::error::MigrationError;

    fn books() -> CollectionName {
        CollectionName::new("books")
    }

    fn entry(legacy_id: &str, new_id: &str, status: EntryStatus) -> MigrationStateEntry {
        MigrationStateEntry {
            collection: books(),
            legacy_id: LegacyId::new(legacy_id),
            new_id: new_id.to_string(),
            new_version: format!("{new_id}-v1"),
            status,
        }
    }

    #[test]
    fn run_lifecycle() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&books()).unwrap();
        assert!(run_id > 0);

        backend
            .complete_run(
                run_id,
                RunStatus::Completed,
                &RunStats {
                    entries_read: 10,
                    entries_migrated: 8,
                    entries_already_migrated: 1,
                    entries_skipped: 1,
                    error_message: None,
                },
            )
            .unwrap();

        let (status, read, finished, error) = backend.get_run_row(run_id).unwrap();
        assert_eq!(status, "completed");
        assert_eq!(read, 10);
        assert!(finished.is_some());
        assert!(error.is_none());
    }

    #[test]
    fn run_failure_keeps_message() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&books()).unwrap();
        backend
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunStats {
                    error_message: Some("scroll exhausted retries".into()),
                    ..RunStats::default()
                },
            )
            .unwrap();
        let (status, _, _, error) = backend.get_run_row(run_id).unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error.as_deref(), Some("scroll exhausted retries"));
    }

    #[test]
    fn find_entry_missing_is_none() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(backend
            .find_entry(&books(), &LegacyId::new("1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn append_is_at_most_once_per_run() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&books()).unwrap();
        let e = entry("1001", "abc", EntryStatus::Migrated);

        assert!(backend.append_entry(run_id, &e).unwrap());
        assert!(!backend.append_entry(run_id, &e).unwrap());
        assert_eq!(backend.count_state_rows("books", "1001").unwrap(), 1);
    }

    #[test]
    fn find_entry_returns_newest_row() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run1 = backend.start_run(&books()).unwrap();
        backend
            .append_entry(run1, &entry("1001", "abc", EntryStatus::Migrated))
            .unwrap();
        let run2 = backend.start_run(&books()).unwrap();
        backend
            .append_entry(run2, &entry("1001", "abc", EntryStatus::AlreadyMigrated))
            .unwrap();

        let found = backend
            .find_entry(&books(), &LegacyId::new("1001"))
            .unwrap()
            .unwrap();
        assert_eq!(found.status, EntryStatus::AlreadyMigrated);
        assert_eq!(found.new_id, "abc");
    }

    #[test]
    fn entries_are_latest_per_legacy_id() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run1 = backend.start_run(&books()).unwrap();
        backend
            .append_entry(run1, &entry("2", "b", EntryStatus::Migrated))
            .unwrap();
        backend
            .append_entry(run1, &entry("1", "a", EntryStatus::Migrated))
            .unwrap();
        let run2 = backend.start_run(&books()).unwrap();
        backend
            .append_entry(run2, &entry("1", "a", EntryStatus::AlreadyMigrated))
            .unwrap();

        let all = backend.entries(&books()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].legacy_id.as_str(), "1");
        assert_eq!(all[0].status, EntryStatus::AlreadyMigrated);
        assert_eq!(all[1].legacy_id.as_str(), "2");
    }

    #[test]
    fn collections_are_independent() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&books()).unwrap();
        backend
            .append_entry(run_id, &entry("1", "a", EntryStatus::Migrated))
            .unwrap();
        assert!(backend
            .find_entry(&CollectionName::new("videos"), &LegacyId::new("1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn error_records_insert() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&books()).unwrap();
        let records = vec![
            ErrorRecord::from_error(
                "books",
                &MigrationError::field_transform("1", "260__c", serde_json::json!("19xx"), "bad year"),
            ),
            ErrorRecord::from_error("books", &MigrationError::unroutable("2", "no model")),
        ];

        let count = backend.insert_error_records(run_id, &records).unwrap();
        assert_eq!(count, 2);
        let (field, message) = backend.first_error_field(run_id).unwrap();
        assert_eq!(field.as_deref(), Some("260__c"));
        assert_eq!(message, "bad year");
    }

    #[test]
    fn error_records_empty_insert() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert_eq!(backend.insert_error_records(1, &[]).unwrap(), 0);
    }

    #[test]
    fn error_records_invalid_run_id_includes_operation_context() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let records = vec![ErrorRecord::from_error(
            "books",
            &MigrationError::unroutable("9", "no model"),
        )];
        let err = backend
            .insert_error_records(999, &records)
            .expect_err("invalid run id should fail");
        assert!(err.to_string().contains("insert_error_records"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let backend = SqliteStateBackend::open(&path).unwrap();
        backend.start_run(&books()).unwrap();
        assert!(path.exists());
    }
}
