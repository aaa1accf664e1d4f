//! Search queries for legacy events and their migrated copies.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use ferry_types::entry::LegacyId;
use ferry_types::event::EventType;

const TIMESTAMP_FIELD: &str = "timestamp";

fn upper_bound(before: Option<DateTime<Utc>>) -> Vec<Value> {
    before
        .map(|ts| {
            json!({
                "range": {
                    TIMESTAMP_FIELD: { "lte": ts.to_rfc3339_opts(SecondsFormat::Secs, true) }
                }
            })
        })
        .into_iter()
        .collect()
}

/// Legacy events of one entity and event type, optionally capped at
/// `before` for incremental runs.
///
/// The event-type term is only added when the legacy index stores the
/// type in a field; otherwise the source index alone determines it.
#[must_use]
pub fn build_query(
    entity_field: &str,
    legacy_id: &LegacyId,
    event_type_field: Option<&str>,
    event_type: EventType,
    before: Option<DateTime<Utc>>,
) -> Value {
    let mut must = vec![json!({ "term": { entity_field: legacy_id.as_str() } })];
    if let Some(field) = event_type_field {
        must.push(json!({ "term": { field: event_type.as_str() } }));
    }
    json!({
        "bool": {
            "must": must,
            "filter": upper_bound(before),
        }
    })
}

/// Migrated events of one destination entity and event type.
#[must_use]
pub fn migrated_query(parent_id: &str, event_type: EventType, before: Option<DateTime<Utc>>) -> Value {
    json!({
        "bool": {
            "must": [
                { "term": { "parent_recid": parent_id } },
                { "term": { "event_type": event_type.as_str() } },
                { "term": { "migrated": true } },
            ],
            "filter": upper_bound(before),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_matches_entity_and_type() {
        let q = build_query(
            "id_bibrec",
            &LegacyId::new("1001"),
            Some("event_type"),
            EventType::Download,
            None,
        );
        let must = q["bool"]["must"].as_array().unwrap();
        assert_eq!(must[0]["term"]["id_bibrec"], "1001");
        assert_eq!(must[1]["term"]["event_type"], "download");
        assert!(q["bool"]["filter"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_query_without_type_field_and_with_bound() {
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = build_query("id_bibrec", &LegacyId::new("7"), None, EventType::Pageview, Some(before));
        assert_eq!(q["bool"]["must"].as_array().unwrap().len(), 1);
        assert_eq!(
            q["bool"]["filter"][0]["range"]["timestamp"]["lte"],
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_migrated_query_filters_on_flag() {
        let q = migrated_query("rec-1", EventType::Pageview, None);
        let must = q["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert_eq!(must[2]["term"]["migrated"], true);
    }
}
