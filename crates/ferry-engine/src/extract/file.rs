//! JSON dump file extractor.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::Value;

use ferry_types::entry::{LegacyEntry, LegacyId};
use ferry_types::error::{ErrorScope, MigrationError};

use crate::config::types::FileLayout;
use crate::extract::RecordShape;

enum Items {
    Records(std::vec::IntoIter<Value>),
    Grouped {
        groups: serde_json::map::IntoIter,
        current: Option<(LegacyId, std::vec::IntoIter<Value>)>,
    },
}

/// Yields each entry of a JSON dump once.
///
/// The whole document is parsed up front, so read and parse failures abort
/// before the first entry.
pub struct FileExtractor {
    shape: RecordShape,
    items: Items,
    position: usize,
}

impl FileExtractor {
    /// Load `path` with the given layout.
    ///
    /// # Errors
    ///
    /// Returns a collection-scoped malformed error when the file cannot be
    /// read, is not JSON, or does not match `layout`.
    pub fn open(
        path: &Path,
        layout: FileLayout,
        tag_field: &str,
        tags: Vec<String>,
    ) -> Result<Self, MigrationError> {
        let fatal = |code: &str, msg: String| {
            MigrationError::malformed(code, msg).with_scope(ErrorScope::Collection)
        };

        let file = File::open(path)
            .map_err(|e| fatal("DUMP_UNREADABLE", format!("{}: {e}", path.display())))?;
        let document: Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| fatal("DUMP_NOT_JSON", format!("{}: {e}", path.display())))?;

        let items = match (layout, document) {
            (FileLayout::Records, Value::Array(records)) => Items::Records(records.into_iter()),
            (FileLayout::Grouped, Value::Object(groups)) => Items::Grouped {
                groups: groups.into_iter(),
                current: None,
            },
            (layout, _) => {
                return Err(fatal(
                    "DUMP_LAYOUT",
                    format!(
                        "{} does not match the '{}' layout",
                        path.display(),
                        match layout {
                            FileLayout::Records => "records (array)",
                            FileLayout::Grouped => "grouped (object)",
                        }
                    ),
                ))
            }
        };

        tracing::info!(path = %path.display(), ?layout, "Opened legacy dump");

        Ok(Self {
            shape: RecordShape::new(tag_field, tags),
            items,
            position: 0,
        })
    }

    fn next_grouped(
        shape: &RecordShape,
        groups: &mut serde_json::map::IntoIter,
        current: &mut Option<(LegacyId, std::vec::IntoIter<Value>)>,
    ) -> Option<Result<LegacyEntry, MigrationError>> {
        loop {
            if let Some((parent, records)) = current.as_mut() {
                let parent: &LegacyId = parent;
                if let Some(raw) = records.next() {
                    return Some(shape.parse(raw, None, Some(parent)).map_err(|e| {
                        e.with_details(serde_json::json!({ "parent": parent.as_str() }))
                    }));
                }
                *current = None;
            }

            let (key, value) = groups.next()?;
            let records = match value {
                Value::Array(records) => records,
                single @ Value::Object(_) => vec![single],
                _ => {
                    return Some(Err(MigrationError::malformed(
                        "BAD_GROUP",
                        format!("group '{key}' is not a list of records"),
                    )
                    .with_legacy_id(key)));
                }
            };
            *current = Some((LegacyId::new(key), records.into_iter()));
        }
    }
}

impl Iterator for FileExtractor {
    type Item = Result<LegacyEntry, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match &mut self.items {
            Items::Records(records) => records
                .next()
                .map(|raw| self.shape.parse(raw, None, None)),
            Items::Grouped { groups, current } => {
                Self::next_grouped(&self.shape, groups, current)
            }
        }?;
        self.position += 1;
        if let Err(err) = &item {
            tracing::warn!(position = self.position, error = %err, "Skipping malformed dump item");
        }
        Some(item)
    }
}
