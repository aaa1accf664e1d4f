//! Binding legacy usage events to migrated entities and versions.

use chrono::{DateTime, Utc};
use serde_json::Value;

use ferry_types::entry::LegacyId;
use ferry_types::error::MigrationError;
use ferry_types::event::{EventType, FileContext, RemappedEvent, UsageEvent};

use crate::extract::parse_timestamp;
use crate::service::{EntityVersions, SearchHit, VersionInfo};

fn text(source: &Value, key: &str) -> Option<String> {
    match source.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(source: &Value, key: &str) -> Option<u32> {
    match source.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(source: &Value, key: &str) -> bool {
    match source.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Read one legacy event from a search hit.
///
/// # Errors
///
/// Returns an item-scoped malformed error when the entity id or timestamp
/// is missing, or a download event names no file.
pub fn parse_event(
    hit: &SearchHit,
    event_type: EventType,
    entity_field: &str,
) -> Result<UsageEvent, MigrationError> {
    let source = &hit.source;
    let malformed = |code: &str, msg: String| {
        MigrationError::malformed(code, msg)
            .with_details(serde_json::json!({ "index": hit.index, "id": hit.id }))
    };

    let legacy_entity_id = source
        .get(entity_field)
        .and_then(LegacyId::from_json)
        .ok_or_else(|| malformed("MISSING_ENTITY", format!("event {} has no {entity_field}", hit.id)))?;
    let timestamp: DateTime<Utc> = text(source, "timestamp")
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| malformed("BAD_TIMESTAMP", format!("event {} has no usable timestamp", hit.id)))?;

    let file = match event_type {
        EventType::Download => {
            let file_id = text(source, "id_bibdoc")
                .or_else(|| text(source, "file_id"))
                .ok_or_else(|| malformed("MISSING_FILE", format!("download {} names no file", hit.id)))?;
            let version = number(source, "file_version")
                .ok_or_else(|| malformed("MISSING_FILE", format!("download {} has no file version", hit.id)))?;
            Some(FileContext {
                file_id,
                version,
                format: text(source, "file_format"),
            })
        }
        EventType::Pageview => None,
    };

    Ok(UsageEvent {
        legacy_event_id: hit.id.clone(),
        legacy_entity_id,
        event_type,
        timestamp,
        visitor_id: text(source, "visitor_id")
            .or_else(|| text(source, "id_user"))
            .or_else(|| text(source, "client_host"))
            .unwrap_or_else(|| "anonymous".to_string()),
        session_id: text(source, "unique_session_id"),
        country: text(source, "country"),
        is_robot: flag(source, "is_robot"),
        file,
    })
}

/// Key of the destination file a download refers to: the first file of the
/// version with the event's format extension, else the version's first
/// file, else the legacy file id.
fn file_key(version: &VersionInfo, file: &FileContext) -> String {
    let by_format = file.format.as_deref().and_then(|format| {
        let suffix = format!(".{}", format.trim_start_matches('.').to_ascii_lowercase());
        version
            .files
            .iter()
            .find(|key| key.to_ascii_lowercase().ends_with(&suffix))
    });
    by_format
        .or_else(|| version.files.first())
        .cloned()
        .unwrap_or_else(|| file.file_id.clone())
}

/// Bind `event` to a destination version.
///
/// Downloads bind to the version migrated from the event's legacy file
/// version. Page views always bind to the latest version, whatever existed
/// when the view happened. Returns `None` when no version fits.
#[must_use]
pub fn remap_event(event: &UsageEvent, versions: &EntityVersions) -> Option<RemappedEvent> {
    let (version, file) = match (&event.event_type, &event.file) {
        (EventType::Download, Some(file)) => {
            let Some(version) = versions.by_legacy_version(file.version) else {
                tracing::warn!(
                    legacy_event_id = event.legacy_event_id.as_str(),
                    legacy_id = event.legacy_entity_id.as_str(),
                    file_id = file.file_id.as_str(),
                    file_version = file.version,
                    "no file version found"
                );
                return None;
            };
            (version, Some(file))
        }
        (EventType::Download, None) => return None,
        (EventType::Pageview, _) => {
            let Some(version) = versions.latest_version() else {
                tracing::warn!(
                    legacy_event_id = event.legacy_event_id.as_str(),
                    parent_id = versions.parent_id.as_str(),
                    latest = versions.latest.as_str(),
                    "latest version not listed"
                );
                return None;
            };
            (version, None)
        }
    };

    let file_key = file.map(|f| file_key(version, f));
    let unique_id = match &file_key {
        Some(key) => format!("{}_{key}", version.version_id),
        None => format!("ui_{}", version.version_id),
    };

    Some(RemappedEvent {
        id: RemappedEvent::migrated_id(&event.legacy_event_id),
        timestamp: event.timestamp,
        recid: version.version_id.clone(),
        parent_recid: versions.parent_id.clone(),
        legacy_event_id: event.legacy_event_id.clone(),
        legacy_entity_id: event.legacy_entity_id.clone(),
        event_type: event.event_type,
        visitor_id: event.visitor_id.clone(),
        unique_session_id: event.session_id.clone(),
        unique_id,
        country: event.country.clone(),
        is_robot: event.is_robot,
        file_id: file.map(|f| f.file_id.clone()),
        file_key,
        migrated: true,
    })
}

/// Destination index for an event: `<prefix>-YYYY-MM` when monthly.
#[must_use]
pub fn dest_index(prefix: &str, timestamp: DateTime<Utc>, monthly: bool) -> String {
    if monthly {
        format!("{prefix}-{}", timestamp.format("%Y-%m"))
    } else {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn versions() -> EntityVersions {
        EntityVersions {
            parent_id: "rec-1".into(),
            latest: "v3".into(),
            versions: vec![
                VersionInfo {
                    version_id: "v1".into(),
                    legacy_version: Some(1),
                    files: vec!["thesis.pdf".into(), "thesis.docx".into()],
                },
                VersionInfo {
                    version_id: "v3".into(),
                    legacy_version: Some(3),
                    files: vec!["thesis-final.pdf".into()],
                },
            ],
        }
    }

    fn hit(id: &str, source: Value) -> SearchHit {
        SearchHit {
            index: "cds-events".into(),
            id: id.into(),
            source,
        }
    }

    #[test]
    fn test_download_binds_to_matching_version() {
        let event = parse_event(
            &hit(
                "e1",
                json!({"id_bibrec": 1001, "timestamp": "2019-05-03T10:00:00", "id_bibdoc": 55,
                       "file_version": "1", "file_format": "DOCX", "visitor_id": "v-9"}),
            ),
            EventType::Download,
            "id_bibrec",
        )
        .unwrap();
        let remapped = remap_event(&event, &versions()).unwrap();
        assert_eq!(remapped.id, "migrated_e1");
        assert_eq!(remapped.recid, "v1");
        assert_eq!(remapped.parent_recid, "rec-1");
        assert_eq!(remapped.file_key.as_deref(), Some("thesis.docx"));
        assert_eq!(remapped.unique_id, "v1_thesis.docx");
        assert!(remapped.migrated);
    }

    #[test]
    fn test_download_without_matching_version_is_skipped() {
        let event = parse_event(
            &hit(
                "e2",
                json!({"id_bibrec": 1001, "timestamp": "2019-05-03", "id_bibdoc": 55, "file_version": 2}),
            ),
            EventType::Download,
            "id_bibrec",
        )
        .unwrap();
        assert!(remap_event(&event, &versions()).is_none());
    }

    // Page views bind to the latest version even when the view predates it.
    #[test]
    fn test_pageview_always_binds_to_latest() {
        let event = parse_event(
            &hit("e3", json!({"id_bibrec": "1001", "timestamp": "2001-01-01 00:00:00", "is_robot": "1"})),
            EventType::Pageview,
            "id_bibrec",
        )
        .unwrap();
        let remapped = remap_event(&event, &versions()).unwrap();
        assert_eq!(remapped.recid, "v3");
        assert_eq!(remapped.unique_id, "ui_v3");
        assert!(remapped.is_robot);
        assert_eq!(remapped.visitor_id, "anonymous");
        assert!(remapped.file_key.is_none());
    }

    #[test]
    fn test_malformed_events_are_item_scoped() {
        let no_entity = parse_event(&hit("x", json!({"timestamp": "2020-01-01"})), EventType::Pageview, "id_bibrec")
            .unwrap_err();
        assert_eq!(no_entity.code, "MISSING_ENTITY");
        assert!(no_entity.is_entry_scoped());

        let no_file = parse_event(
            &hit("y", json!({"id_bibrec": 1, "timestamp": "2020-01-01"})),
            EventType::Download,
            "id_bibrec",
        )
        .unwrap_err();
        assert_eq!(no_file.code, "MISSING_FILE");
    }

    #[test]
    fn test_dest_index_is_monthly() {
        let ts = Utc.with_ymd_and_hms(2019, 5, 3, 10, 0, 0).unwrap();
        assert_eq!(dest_index("events-stats-file-download", ts, true), "events-stats-file-download-2019-05");
        assert_eq!(dest_index("events", ts, false), "events");
    }
}
