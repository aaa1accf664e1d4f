//! Lazy producers of legacy entries.
//!
//! Every extractor is a finite iterator of `Result<LegacyEntry, MigrationError>`
//! that cannot be restarted once consumed; re-running means building a new
//! extractor from configuration. Item-scoped errors skip one source item and
//! iteration continues; collection-scoped errors end the sequence.

pub mod file;
pub mod scroll;
pub mod search;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use ferry_types::entry::{
    normalize_tags, LegacyEntry, LegacyFields, LegacyId, LegacySnapshot,
};
use ferry_types::error::MigrationError;

pub use file::FileExtractor;
pub use scroll::ScrollSearch;
pub use search::SearchExtractor;

/// Boxed entry stream consumed by the runner.
pub type EntryStream<'a> = Box<dyn Iterator<Item = Result<LegacyEntry, MigrationError>> + 'a>;

const ID_KEYS: &[&str] = &["legacy_id", "recid", "id"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "modification_date"];

/// How to read tags and ids out of a raw record object.
#[derive(Debug, Clone)]
pub struct RecordShape {
    pub tag_field: String,
    /// Tags added to every entry.
    pub tags: Vec<String>,
}

impl RecordShape {
    #[must_use]
    pub fn new(tag_field: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            tag_field: tag_field.into(),
            tags,
        }
    }

    /// Build a legacy entry from one raw JSON record.
    ///
    /// Recognised keys are consumed: the id (`legacy_id`, `recid` or `id`),
    /// the tag field, `collections`, and either nested `revisions` or a
    /// top-level `modification_date`. Everything else becomes snapshot
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns an item-scoped malformed error for non-objects, missing ids,
    /// bad timestamps, and revisions without a field object.
    pub fn parse(
        &self,
        raw: Value,
        fallback_id: Option<&str>,
        parent: Option<&LegacyId>,
    ) -> Result<LegacyEntry, MigrationError> {
        let Value::Object(mut obj) = raw else {
            return Err(MigrationError::malformed(
                "NOT_AN_OBJECT",
                "legacy record is not a JSON object",
            ));
        };

        let id = ID_KEYS
            .iter()
            .find_map(|key| obj.remove(*key).as_ref().and_then(LegacyId::from_json))
            .or_else(|| fallback_id.map(LegacyId::new))
            .ok_or_else(|| MigrationError::malformed("MISSING_ID", "legacy record has no id"))?;

        let mut tags = self.tags.clone();
        collect_tags(obj.remove("collections"), &mut tags);
        collect_tags(obj.remove(&self.tag_field), &mut tags);

        let snapshots = match obj.remove("revisions") {
            Some(Value::Array(revisions)) => revisions
                .into_iter()
                .map(|rev| self.parse_revision(rev, &mut tags))
                .collect::<Result<Vec<_>, _>>(),
            Some(_) => Err(MigrationError::malformed(
                "BAD_REVISIONS",
                "'revisions' must be an array",
            )),
            None => take_timestamp(&mut obj).map(|timestamp| {
                vec![LegacySnapshot {
                    timestamp,
                    fields: obj.into_iter().collect(),
                }]
            }),
        }
        .map_err(|e| e.with_legacy_id(id.as_str()))?;

        Ok(LegacyEntry {
            id,
            tags: normalize_tags(tags),
            parent: parent.cloned(),
            snapshots,
        })
    }

    fn parse_revision(
        &self,
        raw: Value,
        tags: &mut Vec<String>,
    ) -> Result<LegacySnapshot, MigrationError> {
        let Value::Object(mut rev) = raw else {
            return Err(MigrationError::malformed(
                "BAD_REVISIONS",
                "revision is not a JSON object",
            ));
        };
        let timestamp = take_timestamp(&mut rev)?;
        let Some(Value::Object(mut fields)) = rev.remove("fields") else {
            return Err(MigrationError::malformed(
                "BAD_REVISIONS",
                "revision has no 'fields' object",
            ));
        };
        collect_tags(fields.remove(&self.tag_field), tags);
        Ok(LegacySnapshot {
            timestamp,
            fields: fields.into_iter().collect::<LegacyFields>(),
        })
    }
}

fn collect_tags(value: Option<Value>, tags: &mut Vec<String>) {
    match value {
        Some(Value::String(s)) => tags.push(s),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => tags.push(s),
                    Value::Object(obj) => {
                        if let Some(Value::String(s)) = obj.get("primary").or_else(|| obj.get("a")) {
                            tags.push(s.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn take_timestamp(obj: &mut Map<String, Value>) -> Result<DateTime<Utc>, MigrationError> {
    for key in TIMESTAMP_KEYS {
        if let Some(value) = obj.remove(*key) {
            let parsed = match &value {
                Value::String(s) => parse_timestamp(s).ok_or_else(|| format!("unparseable {key} '{s}'")),
                other => Err(format!("{key} must be a string, got {other}")),
            };
            return parsed.map_err(|message| {
                let mut err = MigrationError::malformed("BAD_TIMESTAMP", message);
                err.field = Some((*key).to_string());
                err.raw_value = Some(value);
                err
            });
        }
    }
    Ok(DateTime::<Utc>::UNIX_EPOCH)
}

/// Parse RFC 3339, the legacy `YYYY-MM-DD HH:MM:SS` form, or a bare date.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Merge adjacent entries that share a legacy id into one multi-revision
/// entry. Buffers at most one entry.
pub fn coalesce_revisions<I>(inner: I) -> Coalesce<I>
where
    I: Iterator<Item = Result<LegacyEntry, MigrationError>>,
{
    Coalesce {
        inner,
        pending: None,
    }
}

/// Iterator returned by [`coalesce_revisions`].
pub struct Coalesce<I> {
    inner: I,
    pending: Option<LegacyEntry>,
}

impl<I> Iterator for Coalesce<I>
where
    I: Iterator<Item = Result<LegacyEntry, MigrationError>>,
{
    type Item = Result<LegacyEntry, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next() {
                Some(Ok(entry)) => match self.pending.as_mut() {
                    Some(pending) if pending.id == entry.id => {
                        pending.tags.extend(entry.tags);
                        pending.snapshots.extend(entry.snapshots);
                    }
                    Some(_) => return self.pending.replace(entry).map(Ok),
                    None => self.pending = Some(entry),
                },
                Some(Err(err)) => return Some(Err(err)),
                None => return self.pending.take().map(Ok),
            }
        }
    }
}
