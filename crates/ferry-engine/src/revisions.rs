//! Selects the authoritative revision of a legacy entity.

use ferry_types::entry::{LegacyId, Revision};
use ferry_types::error::MigrationError;

/// Latest-by-timestamp revision; on equal timestamps the last one seen wins.
#[must_use]
pub fn latest(revisions: impl IntoIterator<Item = Revision>) -> Option<Revision> {
    revisions.into_iter().fold(None, |best, rev| match best {
        Some(best) if best.timestamp > rev.timestamp => Some(best),
        _ => Some(rev),
    })
}

/// Streaming accumulator for the revisions of one legacy id.
///
/// Keeps only the current best revision, never merging fields across
/// revisions.
#[derive(Debug)]
pub struct Reconciler {
    legacy_id: LegacyId,
    best: Option<Revision>,
    seen: usize,
}

impl Reconciler {
    #[must_use]
    pub fn new(legacy_id: LegacyId) -> Self {
        Self {
            legacy_id,
            best: None,
            seen: 0,
        }
    }

    /// Offer a revision.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the revision belongs to another
    /// entity.
    pub fn push(&mut self, revision: Revision) -> Result<(), MigrationError> {
        if revision.payload.legacy_id != self.legacy_id {
            return Err(MigrationError::internal(
                "REVISION_MISMATCH",
                format!(
                    "revision of '{}' offered to reconciler of '{}'",
                    revision.payload.legacy_id, self.legacy_id
                ),
            ));
        }
        self.seen += 1;
        self.best = latest(self.best.take().into_iter().chain(std::iter::once(revision)));
        Ok(())
    }

    /// Number of revisions offered so far.
    #[must_use]
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// The authoritative revision, if any was pushed.
    #[must_use]
    pub fn finish(self) -> Option<Revision> {
        if self.seen > 1 {
            tracing::debug!(
                legacy_id = self.legacy_id.as_str(),
                revisions = self.seen,
                "Reconciled revisions, keeping latest"
            );
        }
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ferry_types::entry::{Provenance, TransformedRecord};
    use proptest::prelude::*;
    use serde_json::{json, Map};

    fn revision(id: &str, ts: DateTime<Utc>, marker: &str) -> Revision {
        let mut fields = Map::new();
        fields.insert("marker".into(), json!(marker));
        Revision {
            timestamp: ts,
            payload: TransformedRecord {
                legacy_id: LegacyId::new(id),
                parent: None,
                model: "book".into(),
                fields,
                provenance: Provenance::default(),
            },
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_latest_picks_max_timestamp() {
        let t2020 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t2021 = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let chosen = latest(vec![
            revision("1001", t2021, "2021"),
            revision("1001", t2020, "2020"),
        ])
        .unwrap();
        assert_eq!(chosen.payload.fields["marker"], "2021");
    }

    #[test]
    fn test_ties_resolve_to_last_seen() {
        let chosen = latest(vec![
            revision("1", at(5), "first"),
            revision("1", at(5), "second"),
        ])
        .unwrap();
        assert_eq!(chosen.payload.fields["marker"], "second");
    }

    #[test]
    fn test_empty_input_yields_none() {
        assert!(latest(Vec::new()).is_none());
        assert!(Reconciler::new(LegacyId::new("1")).finish().is_none());
    }

    #[test]
    fn test_reconciler_rejects_foreign_revision() {
        let mut rec = Reconciler::new(LegacyId::new("1"));
        rec.push(revision("1", at(1), "a")).unwrap();
        assert!(rec.push(revision("2", at(2), "b")).is_err());
        assert_eq!(rec.seen(), 1);
        assert_eq!(rec.finish().unwrap().payload.fields["marker"], "a");
    }

    proptest! {
        #[test]
        fn prop_latest_is_order_independent(stamps in prop::collection::btree_set(0i64..1_000_000, 1..8), seed in any::<u64>()) {
            let max = *stamps.iter().max().unwrap();
            let mut revs: Vec<_> = stamps
                .iter()
                .copied()
                .map(|s| revision("7", at(s), &s.to_string()))
                .collect();
            // deterministic shuffle from the seed
            let len = revs.len();
            for i in 0..len {
                let j = usize::try_from(seed.rotate_left(u32::try_from(i).unwrap()) % len as u64).unwrap();
                revs.swap(i, j);
            }

            let mut rec = Reconciler::new(LegacyId::new("7"));
            for rev in revs.clone() {
                rec.push(rev).unwrap();
            }
            let streamed = rec.finish().unwrap();
            let batch = latest(revs).unwrap();
            prop_assert_eq!(streamed.timestamp, at(max));
            prop_assert_eq!(batch.timestamp, at(max));
            prop_assert_eq!(&streamed.payload.fields["marker"], &json!(max.to_string()));
        }
    }
}
