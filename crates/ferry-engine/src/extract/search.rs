//! Legacy entries read from a remote search index.

use ferry_types::entry::LegacyEntry;
use ferry_types::error::MigrationError;

use crate::extract::scroll::ScrollSearch;
use crate::extract::RecordShape;

/// [`ScrollSearch`] whose hit sources are parsed into legacy entries.
/// The hit `_id` is the fallback legacy id.
pub struct SearchExtractor {
    scroll: ScrollSearch,
    shape: RecordShape,
}

impl SearchExtractor {
    #[must_use]
    pub fn new(scroll: ScrollSearch, tag_field: &str, tags: Vec<String>) -> Self {
        Self {
            scroll,
            shape: RecordShape::new(tag_field, tags),
        }
    }
}

impl Iterator for SearchExtractor {
    type Item = Result<LegacyEntry, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hit = match self.scroll.next()? {
            Ok(hit) => hit,
            Err(err) => return Some(Err(err)),
        };
        let parsed = self.shape.parse(hit.source, Some(&hit.id), None);
        if let Err(err) = &parsed {
            tracing::warn!(index = hit.index.as_str(), id = hit.id.as_str(), error = %err, "Skipping malformed search hit");
        }
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::testing::FakeSearch;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn hits_become_entries() {
        let fake = Arc::new(FakeSearch::default());
        fake.insert("legacy", "10", json!({"980__a": ["VIDEO"], "245__a": "Launch"}));
        fake.insert("legacy", "11", json!({"recid": "11", "980__a": "BOOK"}));
        fake.insert("legacy", "12", json!({"modification_date": 5}));

        let scroll = ScrollSearch::new(
            fake.clone(),
            "legacy",
            json!({"match_all": {}}),
            2,
            "1m",
            RetryPolicy::new(1, Duration::ZERO),
        );
        let items: Vec<_> = SearchExtractor::new(scroll, "980__a", vec![]).collect();
        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.id.as_str(), "10");
        assert!(first.has_tag("video"));
        assert!(items[1].as_ref().unwrap().has_tag("BOOK"));
        assert_eq!(items[2].as_ref().unwrap_err().code, "BAD_TIMESTAMP");
        assert_eq!(fake.open_scrolls(), 0);
    }
}
