//! In-memory fakes of the search clusters and the record service.
//!
//! Used by unit tests and by the integration tests under `tests/`. The
//! search fake understands the subset of the query DSL the engine emits:
//! `match_all`, `term`, `range` with `lte`, and `bool.must` of those.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use ferry_types::entry::LegacyId;
use ferry_types::error::MigrationError;
use ferry_types::event::{BulkAction, OpType};

use crate::extract::parse_timestamp;
use crate::service::{
    BulkFailure, BulkResponse, CreatedRecord, EntityVersions, NewRecord, OwnerHint,
    PlaceholderIdentity, RecordService, SearchClient, SearchHit, SearchPage, VersionInfo,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct SearchState {
    indices: BTreeMap<String, BTreeMap<String, Value>>,
    scrolls: HashMap<String, (u32, VecDeque<SearchHit>)>,
    next_scroll: u64,
    fail_remaining: u32,
    search_calls: u64,
    scroll_calls: u64,
    bulk_calls: u64,
}

impl SearchState {
    fn maybe_fail(&mut self, op: &str) -> Result<(), MigrationError> {
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            return Err(MigrationError::transient_network(
                "CONNECTION_RESET",
                format!("{op}: connection reset by peer"),
            ));
        }
        Ok(())
    }

    fn matching(&self, index: &str, query: &Value) -> Vec<SearchHit> {
        self.indices
            .iter()
            .filter(|(name, _)| index_matches(index, name))
            .flat_map(|(name, docs)| {
                docs.iter()
                    .filter(|(_, source)| query_matches(query, source))
                    .map(|(id, source)| SearchHit {
                        index: name.clone(),
                        id: id.clone(),
                        source: source.clone(),
                    })
            })
            .collect()
    }
}

fn index_matches(pattern: &str, name: &str) -> bool {
    pattern.split(',').any(|p| match p.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => p == name,
    })
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    let render = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    a == b || render(a) == render(b)
}

fn query_matches(query: &Value, source: &Value) -> bool {
    if query.get("match_all").is_some() || query.as_object().is_some_and(serde_json::Map::is_empty) {
        return true;
    }
    if let Some(term) = query.get("term").and_then(Value::as_object) {
        return term.iter().all(|(field, expected)| {
            let expected = expected.get("value").unwrap_or(expected);
            source.get(field).is_some_and(|actual| scalar_eq(actual, expected))
        });
    }
    if let Some(range) = query.get("range").and_then(Value::as_object) {
        return range.iter().all(|(field, bounds)| {
            let Some(actual) = source.get(field).and_then(Value::as_str) else {
                return false;
            };
            match bounds.get("lte").and_then(Value::as_str) {
                Some(lte) => match (parse_timestamp(actual), parse_timestamp(lte)) {
                    (Some(a), Some(b)) => a <= b,
                    _ => actual <= lte,
                },
                None => true,
            }
        });
    }
    if let Some(bool_query) = query.get("bool") {
        let must = bool_query.get("must").and_then(Value::as_array);
        let filter = bool_query.get("filter").and_then(Value::as_array);
        return must
            .into_iter()
            .chain(filter)
            .flatten()
            .all(|clause| query_matches(clause, source));
    }
    false
}

/// In-memory search cluster with scroll cursors and create-only bulk.
#[derive(Default)]
pub struct FakeSearch {
    state: Mutex<SearchState>,
}

impl FakeSearch {
    pub fn insert(&self, index: &str, id: &str, source: Value) {
        lock(&self.state)
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), source);
    }

    /// Make the next `n` search, scroll, count, or bulk requests fail with a
    /// transient error.
    pub fn fail_next_requests(&self, n: u32) {
        lock(&self.state).fail_remaining = n;
    }

    #[must_use]
    pub fn open_scrolls(&self) -> usize {
        lock(&self.state).scrolls.len()
    }

    #[must_use]
    pub fn search_calls(&self) -> u64 {
        lock(&self.state).search_calls
    }

    #[must_use]
    pub fn scroll_calls(&self) -> u64 {
        lock(&self.state).scroll_calls
    }

    #[must_use]
    pub fn bulk_calls(&self) -> u64 {
        lock(&self.state).bulk_calls
    }

    /// Documents in indices matching `pattern`.
    #[must_use]
    pub fn documents(&self, pattern: &str) -> Vec<SearchHit> {
        lock(&self.state).matching(pattern, &serde_json::json!({"match_all": {}}))
    }

    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        lock(&self.state).indices.keys().cloned().collect()
    }
}

impl SearchClient for FakeSearch {
    fn search(
        &self,
        index: &str,
        query: &Value,
        page_size: u32,
        _keep_alive: &str,
    ) -> Result<SearchPage, MigrationError> {
        let mut state = lock(&self.state);
        state.search_calls += 1;
        state.maybe_fail("search")?;

        let mut hits: VecDeque<SearchHit> = state.matching(index, query).into();
        let first: Vec<_> = hits
            .drain(..hits.len().min(page_size as usize))
            .collect();
        state.next_scroll += 1;
        let scroll_id = format!("scroll-{}", state.next_scroll);
        state.scrolls.insert(scroll_id.clone(), (page_size, hits));
        Ok(SearchPage {
            scroll_id: Some(scroll_id),
            hits: first,
        })
    }

    fn scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<SearchPage, MigrationError> {
        let mut state = lock(&self.state);
        state.scroll_calls += 1;
        state.maybe_fail("scroll")?;

        let Some((size, remaining)) = state.scrolls.get_mut(scroll_id) else {
            return Err(MigrationError::internal(
                "SCROLL_EXPIRED",
                format!("unknown scroll id '{scroll_id}'"),
            ));
        };
        let take = remaining.len().min(*size as usize);
        let hits = remaining.drain(..take).collect();
        Ok(SearchPage {
            scroll_id: Some(scroll_id.to_string()),
            hits,
        })
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), MigrationError> {
        lock(&self.state).scrolls.remove(scroll_id);
        Ok(())
    }

    fn count(&self, index: &str, query: &Value) -> Result<u64, MigrationError> {
        let mut state = lock(&self.state);
        state.maybe_fail("count")?;
        Ok(state.matching(index, query).len() as u64)
    }

    fn bulk(&self, actions: &[BulkAction]) -> Result<BulkResponse, MigrationError> {
        let mut state = lock(&self.state);
        state.bulk_calls += 1;
        state.maybe_fail("bulk")?;

        let mut response = BulkResponse::default();
        for action in actions {
            let docs = state.indices.entry(action.index.clone()).or_default();
            match action.op_type {
                OpType::Create if docs.contains_key(&action.id) => response.conflicts += 1,
                OpType::Create | OpType::Index => {
                    if action.source.is_object() {
                        docs.insert(action.id.clone(), action.source.clone());
                        response.created += 1;
                    } else {
                        response.failed.push(BulkFailure {
                            id: action.id.clone(),
                            status: 400,
                            reason: "document source must be an object".to_string(),
                        });
                    }
                }
            }
        }
        Ok(response)
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: NewRecord,
    created: CreatedRecord,
}

#[derive(Default)]
struct RecordState {
    records: Vec<StoredRecord>,
    users: Vec<(String, PlaceholderIdentity)>,
    versions: HashMap<String, EntityVersions>,
    next_id: u64,
    fail_creates: u32,
    reject_legacy_ids: HashSet<String>,
    reject_owners: bool,
    create_calls: u64,
}

/// In-memory record-management service.
#[derive(Default)]
pub struct FakeRecords {
    state: Mutex<RecordState>,
}

impl FakeRecords {
    /// Pre-existing destination user.
    pub fn add_user(&self, id: &str, email: &str) {
        lock(&self.state).users.push((
            id.to_string(),
            PlaceholderIdentity {
                username: email.split('@').next().unwrap_or(email).to_string(),
                email: Some(email.to_string()),
                full_name: None,
                source: None,
            },
        ));
    }

    /// Make the next `n` create calls fail transiently.
    pub fn fail_next_creates(&self, n: u32) {
        lock(&self.state).fail_creates = n;
    }

    /// Reject creation of the record bound to `legacy_id`.
    pub fn reject_record(&self, legacy_id: &str) {
        lock(&self.state)
            .reject_legacy_ids
            .insert(legacy_id.to_string());
    }

    /// Refuse every placeholder user.
    pub fn reject_owners(&self) {
        lock(&self.state).reject_owners = true;
    }

    /// Replace the version list of a destination entity.
    pub fn set_versions(&self, versions: EntityVersions) {
        lock(&self.state)
            .versions
            .insert(versions.parent_id.clone(), versions);
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        lock(&self.state).records.len()
    }

    #[must_use]
    pub fn create_calls(&self) -> u64 {
        lock(&self.state).create_calls
    }

    #[must_use]
    pub fn record(&self, legacy_id: &str) -> Option<NewRecord> {
        lock(&self.state)
            .records
            .iter()
            .find(|r| r.record.legacy_id.as_str() == legacy_id)
            .map(|r| r.record.clone())
    }

    /// Destination id created for `legacy_id`.
    #[must_use]
    pub fn record_id(&self, legacy_id: &str) -> Option<String> {
        lock(&self.state)
            .records
            .iter()
            .find(|r| r.record.legacy_id.as_str() == legacy_id)
            .map(|r| r.created.id.clone())
    }

    #[must_use]
    pub fn users(&self) -> Vec<(String, PlaceholderIdentity)> {
        lock(&self.state).users.clone()
    }
}

impl RecordService for FakeRecords {
    fn find_by_legacy_id(
        &self,
        collection: &str,
        legacy_id: &LegacyId,
    ) -> Result<Option<CreatedRecord>, MigrationError> {
        Ok(lock(&self.state)
            .records
            .iter()
            .find(|r| r.record.collection == collection && &r.record.legacy_id == legacy_id)
            .map(|r| r.created.clone()))
    }

    fn resolve_owner(&self, hint: &OwnerHint) -> Result<Option<String>, MigrationError> {
        let state = lock(&self.state);
        let found = state.users.iter().find(|(_, user)| {
            (hint.email.is_some() && user.email == hint.email)
                || hint
                    .legacy_id
                    .as_ref()
                    .is_some_and(|id| user.username == format!("legacy-user-{id}"))
        });
        Ok(found.map(|(id, _)| id.clone()))
    }

    fn create_owner(&self, placeholder: &PlaceholderIdentity) -> Result<String, MigrationError> {
        let mut state = lock(&self.state);
        if state.reject_owners {
            return Err(MigrationError::identity(
                "USER_REJECTED",
                format!("user '{}' rejected", placeholder.username),
            ));
        }
        state.next_id += 1;
        let id = format!("user-{}", state.next_id);
        state.users.push((id.clone(), placeholder.clone()));
        Ok(id)
    }

    fn create_and_publish(&self, record: &NewRecord) -> Result<CreatedRecord, MigrationError> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(MigrationError::transient_network("HTTP_503", "service unavailable"));
        }
        if state.reject_legacy_ids.contains(record.legacy_id.as_str()) {
            return Err(MigrationError::data("VALIDATION", "metadata rejected")
                .with_legacy_id(record.legacy_id.as_str()));
        }
        state.next_id += 1;
        let id = format!("rec-{}", state.next_id);
        let created = CreatedRecord {
            id: id.clone(),
            version: format!("{id}-v1"),
        };
        state.versions.insert(
            id.clone(),
            EntityVersions {
                parent_id: id,
                latest: created.version.clone(),
                versions: vec![VersionInfo {
                    version_id: created.version.clone(),
                    legacy_version: Some(1),
                    files: Vec::new(),
                }],
            },
        );
        state.records.push(StoredRecord {
            record: record.clone(),
            created: created.clone(),
        });
        Ok(created)
    }

    fn versions(&self, parent_id: &str) -> Result<EntityVersions, MigrationError> {
        lock(&self.state)
            .versions
            .get(parent_id)
            .cloned()
            .ok_or_else(|| {
                MigrationError::data("NOT_FOUND", format!("no record '{parent_id}'"))
            })
    }
}
