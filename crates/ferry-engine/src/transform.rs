//! Applies a transform model to legacy snapshots.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use ferry_types::entry::{LegacyEntry, LegacySnapshot, Provenance, Revision, TransformedRecord};
use ferry_types::error::MigrationError;

use crate::rules::TransformModel;

/// Converts snapshots into transformed records and tallies unmapped
/// field codes for curation.
#[derive(Debug, Default)]
pub struct Transformer {
    unmapped: BTreeMap<String, u64>,
}

impl Transformer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform one snapshot of `entry` with `model`.
    ///
    /// Unmapped fields are recorded and logged, never raised.
    ///
    /// # Errors
    ///
    /// Returns an entry-scoped field-transform error carrying the field
    /// code, the offending value, and the legacy id when a handler rejects
    /// a value.
    pub fn transform(
        &mut self,
        entry: &LegacyEntry,
        snapshot: &LegacySnapshot,
        model: &TransformModel,
    ) -> Result<TransformedRecord, MigrationError> {
        let mut output = model.defaults().clone();
        let mut provenance = Provenance::default();

        for (code, value) in &snapshot.fields {
            if model.is_ignored(code) {
                provenance.ignored.insert(code.clone());
                continue;
            }
            let Some(handler) = model.handler_for(code) else {
                tracing::warn!(
                    legacy_id = entry.id.as_str(),
                    model = model.name(),
                    field = code.as_str(),
                    "Unmapped legacy field"
                );
                *self.unmapped.entry(code.clone()).or_insert(0) += 1;
                provenance.unmapped.insert(code.clone());
                continue;
            };

            let items: &[Value] = match value {
                Value::Array(items) => items,
                single => std::slice::from_ref(single),
            };
            for item in items {
                let fragment = handler.call(item, &output).map_err(|e| {
                    MigrationError::field_transform(entry.id.as_str(), code, item.clone(), e.message)
                })?;
                merge_into(&mut output, fragment);
            }
        }

        Ok(TransformedRecord {
            legacy_id: entry.id.clone(),
            parent: entry.parent.clone(),
            model: model.name().to_string(),
            fields: output,
            provenance,
        })
    }

    /// Transform every snapshot of `entry` into a revision.
    ///
    /// # Errors
    ///
    /// Fails on the first snapshot a handler rejects.
    pub fn revisions(
        &mut self,
        entry: &LegacyEntry,
        model: &TransformModel,
    ) -> Result<Vec<Revision>, MigrationError> {
        entry
            .snapshots
            .iter()
            .map(|snapshot| {
                Ok(Revision {
                    timestamp: snapshot.timestamp,
                    payload: self.transform(entry, snapshot, model)?,
                })
            })
            .collect()
    }

    /// Unmapped field codes with occurrence counts.
    #[must_use]
    pub fn unmapped(&self) -> &BTreeMap<String, u64> {
        &self.unmapped
    }
}

/// Merge a handler fragment into the accumulated output.
///
/// Objects merge recursively, arrays concatenate, a scalar pushed onto an
/// existing array is appended, anything else replaces.
pub fn merge_into(output: &mut Map<String, Value>, fragment: Map<String, Value>) {
    for (key, incoming) in fragment {
        match (output.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                existing.extend(incoming);
            }
            (Some(Value::Array(existing)), scalar) if !scalar.is_object() => {
                existing.push(scalar);
            }
            (_, incoming) => {
                output.insert(key, incoming);
            }
        }
    }
}
