//! Idempotent writes of reconciled records into the destination service.

pub mod identity;

use std::collections::HashMap;

use serde_json::{Map, Value};

use ferry_state::{StateBackend, StateError};
use ferry_types::entry::{LegacyId, TransformedRecord};
use ferry_types::error::{MigrationError, Priority};
use ferry_types::state::{CollectionName, EntryStatus, MigrationStateEntry};

use crate::retry::RetryPolicy;
use crate::rules::catalog::{MANUAL_IMPORT_KEY, OWNER_KEY, REPLY_TO_KEY};
use crate::service::{NewRecord, OwnerHint, RecordService};

/// Legacy id to destination id of records created during one collection run.
///
/// Replies look up their parent here first, then in the state log.
#[derive(Debug, Default)]
pub struct ReplyIndex {
    created: HashMap<LegacyId, String>,
}

impl ReplyIndex {
    pub fn record(&mut self, legacy_id: LegacyId, new_id: String) {
        self.created.insert(legacy_id, new_id);
    }

    #[must_use]
    pub fn get(&self, legacy_id: &LegacyId) -> Option<&str> {
        self.created.get(legacy_id).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.created.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

fn state_error(err: &StateError) -> MigrationError {
    MigrationError::internal("STATE_BACKEND", err.to_string())
}

/// Writes transformed records for one collection run.
///
/// Every successfully loaded or already-present entity gets exactly one
/// state entry appended to the run.
pub struct Loader<'a> {
    collection: CollectionName,
    run_id: i64,
    state: &'a dyn StateBackend,
    records: &'a dyn RecordService,
    retry: RetryPolicy,
    require_owner: bool,
    replies: ReplyIndex,
}

impl<'a> Loader<'a> {
    pub fn new(
        collection: CollectionName,
        run_id: i64,
        state: &'a dyn StateBackend,
        records: &'a dyn RecordService,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            collection,
            run_id,
            state,
            records,
            retry,
            require_owner: false,
            replies: ReplyIndex::default(),
        }
    }

    /// Skip records that carry no owner hint instead of loading them ownerless.
    #[must_use]
    pub fn require_owner(mut self, require: bool) -> Self {
        self.require_owner = require;
        self
    }

    #[must_use]
    pub fn replies(&self) -> &ReplyIndex {
        &self.replies
    }

    /// Load one record.
    ///
    /// # Errors
    ///
    /// Entry-scoped errors (manual import, identity, rejected data, missing
    /// reply target) mean only this record is skipped. Collection-scoped
    /// errors (exhausted retries, state backend failures) end the run.
    pub fn load(&mut self, record: &TransformedRecord) -> Result<MigrationStateEntry, MigrationError> {
        let legacy_id = &record.legacy_id;

        if let Some(existing) = self
            .state
            .find_entry(&self.collection, legacy_id)
            .map_err(|e| state_error(&e))?
        {
            tracing::debug!(
                collection = self.collection.as_str(),
                legacy_id = legacy_id.as_str(),
                new_id = existing.new_id.as_str(),
                "Already migrated (state log)"
            );
            return self.already_migrated(legacy_id, existing.new_id, existing.new_version);
        }

        let collection = self.collection.as_str();
        let records = self.records;
        if let Some(found) = self.retry.run("find_by_legacy_id", || {
            records.find_by_legacy_id(collection, legacy_id)
        })? {
            tracing::info!(
                collection,
                legacy_id = legacy_id.as_str(),
                new_id = found.id.as_str(),
                "Already migrated (destination)"
            );
            return self.already_migrated(legacy_id, found.id, found.version);
        }

        let mut metadata = record.fields.clone();
        if let Some(request) = metadata.remove(MANUAL_IMPORT_KEY) {
            return Err(manual_import(&request).with_legacy_id(legacy_id.as_str()));
        }

        let owner_id = match owner_hint(metadata.remove(OWNER_KEY), legacy_id) {
            Some(hint) => Some(identity::resolve_owner(
                self.records,
                &self.retry,
                &hint,
                legacy_id,
            )?),
            None if self.require_owner => {
                return Err(MigrationError::manual_import(
                    "MISSING_OWNER",
                    "record has no owner hint",
                    Priority::Medium,
                )
                .with_legacy_id(legacy_id.as_str()));
            }
            None => None,
        };

        let reply_to_id = match metadata.remove(REPLY_TO_KEY) {
            Some(target) => Some(self.reply_target(&target, legacy_id)?),
            None => None,
        };

        let new_record = NewRecord {
            collection: collection.to_string(),
            legacy_id: legacy_id.clone(),
            model: record.model.clone(),
            metadata,
            owner_id,
            parent_legacy_id: record.parent.clone(),
            reply_to_id,
        };
        let created = self
            .retry
            .run("create_and_publish", || records.create_and_publish(&new_record))
            .map_err(|e| {
                if e.legacy_id.is_none() {
                    e.with_legacy_id(legacy_id.as_str())
                } else {
                    e
                }
            })?;

        tracing::info!(
            collection,
            legacy_id = legacy_id.as_str(),
            model = record.model.as_str(),
            new_id = created.id.as_str(),
            "Migrated"
        );

        self.replies.record(legacy_id.clone(), created.id.clone());
        let entry = self.entry(legacy_id, created.id, created.version, EntryStatus::Migrated);
        self.state
            .append_entry(self.run_id, &entry)
            .map_err(|e| state_error(&e))?;
        Ok(entry)
    }

    fn already_migrated(
        &mut self,
        legacy_id: &LegacyId,
        new_id: String,
        new_version: String,
    ) -> Result<MigrationStateEntry, MigrationError> {
        self.replies.record(legacy_id.clone(), new_id.clone());
        let entry = self.entry(legacy_id, new_id, new_version, EntryStatus::AlreadyMigrated);
        self.state
            .append_entry(self.run_id, &entry)
            .map_err(|e| state_error(&e))?;
        Ok(entry)
    }

    fn entry(
        &self,
        legacy_id: &LegacyId,
        new_id: String,
        new_version: String,
        status: EntryStatus,
    ) -> MigrationStateEntry {
        MigrationStateEntry {
            collection: self.collection.clone(),
            legacy_id: legacy_id.clone(),
            new_id,
            new_version,
            status,
        }
    }

    fn reply_target(&self, target: &Value, legacy_id: &LegacyId) -> Result<String, MigrationError> {
        let Some(target) = LegacyId::from_json(target) else {
            return Err(MigrationError::data("BAD_REPLY_TARGET", format!("reply target {target} is not an id"))
                .with_legacy_id(legacy_id.as_str()));
        };
        if let Some(id) = self.replies.get(&target) {
            return Ok(id.to_string());
        }
        if let Some(entry) = self
            .state
            .find_entry(&self.collection, &target)
            .map_err(|e| state_error(&e))?
        {
            return Ok(entry.new_id);
        }
        Err(MigrationError::data(
            "REPLY_TARGET_MISSING",
            format!("reply target {} has not been migrated", target.as_str()),
        )
        .with_legacy_id(legacy_id.as_str())
        .with_details(serde_json::json!({ "reply_to": target.as_str() })))
    }
}

fn owner_hint(value: Option<Value>, legacy_id: &LegacyId) -> Option<OwnerHint> {
    let value = value?;
    match serde_json::from_value::<OwnerHint>(value.clone()) {
        Ok(hint) => (!hint.is_empty()).then_some(hint),
        Err(e) => {
            tracing::warn!(
                legacy_id = legacy_id.as_str(),
                owner = %value,
                error = %e,
                "Ignoring malformed owner hint"
            );
            None
        }
    }
}

fn manual_import(request: &Value) -> MigrationError {
    let field = |key: &str| request.get(key).and_then(Value::as_str);
    let mut err = MigrationError::manual_import(
        field("code").unwrap_or("MANUAL_IMPORT"),
        field("reason").unwrap_or("record needs manual import"),
        field("priority").map_or(Priority::Medium, Priority::parse_lenient),
    );
    if let Some(details) = request.get("details") {
        err = err.with_details(details.clone());
    }
    err
}

/// Copy of `fields` without the keys only the loader interprets.
#[must_use]
pub fn public_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(k, _)| ![MANUAL_IMPORT_KEY, OWNER_KEY, REPLY_TO_KEY].contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRecords;
    use ferry_state::SqliteStateBackend;
    use ferry_types::entry::Provenance;
    use ferry_types::error::{ErrorCategory, ErrorScope};
    use serde_json::json;
    use std::time::Duration;

    fn record(legacy_id: &str, fields: Value) -> TransformedRecord {
        TransformedRecord {
            legacy_id: LegacyId::new(legacy_id),
            parent: None,
            model: "book".into(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            provenance: Provenance::default(),
        }
    }

    fn setup() -> (SqliteStateBackend, FakeRecords, i64) {
        let state = SqliteStateBackend::in_memory().unwrap();
        let run_id = state.start_run(&CollectionName::new("books")).unwrap();
        (state, FakeRecords::default(), run_id)
    }

    fn loader<'a>(state: &'a SqliteStateBackend, records: &'a FakeRecords, run_id: i64) -> Loader<'a> {
        Loader::new(
            CollectionName::new("books"),
            run_id,
            state,
            records,
            RetryPolicy::new(3, Duration::ZERO),
        )
    }

    #[test]
    fn malformed_owner_hint_loads_without_owner() {
        let (state, records, run_id) = setup();
        let rec = record("1001", json!({"title": "Dune", "owner": "jane@example.org"}));

        let entry = loader(&state, &records, run_id).load(&rec).unwrap();
        assert_eq!(entry.status, EntryStatus::Migrated);
        let created = records.record("1001").unwrap();
        assert!(created.owner_id.is_none());
        assert!(!created.metadata.contains_key("owner"));
        assert!(records.users().is_empty());
    }

    #[test]
    fn loading_twice_creates_one_entity() {
        let (state, records, run_id) = setup();
        let rec = record("1001", json!({"title": "Dune"}));

        let first = loader(&state, &records, run_id).load(&rec).unwrap();
        assert_eq!(first.status, EntryStatus::Migrated);

        let second_run = state.start_run(&CollectionName::new("books")).unwrap();
        let second = loader(&state, &records, second_run).load(&rec).unwrap();
        assert_eq!(second.status, EntryStatus::AlreadyMigrated);
        assert_eq!(second.new_id, first.new_id);
        assert_eq!(records.record_count(), 1);
        assert_eq!(records.create_calls(), 1);
    }

    #[test]
    fn destination_lookup_catches_records_missing_from_state() {
        let (state, records, run_id) = setup();
        let rec = record("7", json!({"title": "x"}));
        loader(&state, &records, run_id).load(&rec).unwrap();

        let fresh_state = SqliteStateBackend::in_memory().unwrap();
        let fresh_run = fresh_state.start_run(&CollectionName::new("books")).unwrap();
        let entry = loader(&fresh_state, &records, fresh_run).load(&rec).unwrap();
        assert_eq!(entry.status, EntryStatus::AlreadyMigrated);
        assert_eq!(records.record_count(), 1);
        assert!(fresh_state
            .find_entry(&CollectionName::new("books"), &LegacyId::new("7"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn reserved_keys_are_stripped_before_create() {
        let (state, records, run_id) = setup();
        let rec = record(
            "1",
            json!({"title": "x", "owner": {"email": "a@example.org"}}),
        );
        let entry = loader(&state, &records, run_id).load(&rec).unwrap();
        let stored = records.record("1").unwrap();
        assert!(!stored.metadata.contains_key(OWNER_KEY));
        assert!(stored.owner_id.is_some());
        assert_eq!(entry.status, EntryStatus::Migrated);
    }

    #[test]
    fn manual_import_request_skips_entry() {
        let (state, records, run_id) = setup();
        let rec = record(
            "2",
            json!({"_manual_import": {"code": "OFFLINE_MEDIA", "reason": "tape", "priority": "high"}}),
        );
        let err = loader(&state, &records, run_id).load(&rec).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ManualImport);
        assert_eq!(err.code, "OFFLINE_MEDIA");
        assert_eq!(err.priority, Some(Priority::High));
        assert_eq!(err.legacy_id.as_deref(), Some("2"));
        assert_eq!(records.create_calls(), 0);
    }

    #[test]
    fn missing_owner_only_matters_when_required() {
        let (state, records, run_id) = setup();
        let rec = record("3", json!({"title": "x"}));
        let err = loader(&state, &records, run_id)
            .require_owner(true)
            .load(&rec)
            .unwrap_err();
        assert_eq!(err.code, "MISSING_OWNER");
        assert!(err.is_entry_scoped());
    }

    #[test]
    fn transient_create_failures_are_retried() {
        let (state, records, run_id) = setup();
        records.fail_next_creates(2);
        let entry = loader(&state, &records, run_id)
            .load(&record("4", json!({})))
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Migrated);
        assert_eq!(records.create_calls(), 3);
    }

    #[test]
    fn exhausted_create_retries_end_the_run() {
        let (state, records, run_id) = setup();
        records.fail_next_creates(5);
        let err = loader(&state, &records, run_id)
            .load(&record("5", json!({})))
            .unwrap_err();
        assert_eq!(err.scope, ErrorScope::Collection);
        assert_eq!(err.legacy_id.as_deref(), Some("5"));
    }

    #[test]
    fn rejected_metadata_is_entry_scoped() {
        let (state, records, run_id) = setup();
        records.reject_record("6");
        let err = loader(&state, &records, run_id)
            .load(&record("6", json!({})))
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Data);
        assert!(err.is_entry_scoped());
        assert!(state
            .find_entry(&CollectionName::new("books"), &LegacyId::new("6"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn replies_resolve_through_the_run_index() {
        let (state, records, run_id) = setup();
        let mut loader = loader(&state, &records, run_id);
        let parent = loader.load(&record("10", json!({"content": "hi"}))).unwrap();
        loader
            .load(&record("11", json!({"content": "re", "reply_to": "10"})))
            .unwrap();
        assert_eq!(records.record("11").unwrap().reply_to_id, Some(parent.new_id));
        assert_eq!(loader.replies().len(), 2);

        let err = loader
            .load(&record("12", json!({"reply_to": "999"})))
            .unwrap_err();
        assert_eq!(err.code, "REPLY_TARGET_MISSING");
    }

    #[test]
    fn public_fields_drops_reserved_keys() {
        let fields = json!({"title": "x", "owner": {}, "reply_to": "1", "_manual_import": {}});
        let public = public_fields(fields.as_object().unwrap());
        assert_eq!(public.len(), 1);
        assert!(public.contains_key("title"));
    }
}
