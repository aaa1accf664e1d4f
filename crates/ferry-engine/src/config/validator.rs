//! Semantic validation for parsed migration configuration values.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::{CollectionConfig, ExtractConfig, MigrationConfig, StatsConfig};

static KEEP_ALIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*(ms|s|m|h|d)$").expect("valid keep-alive regex"));

fn validate_keep_alive(value: &str, context: &str, errors: &mut Vec<String>) {
    if !KEEP_ALIVE_RE.is_match(value) {
        errors.push(format!(
            "{context}: invalid keep_alive '{value}', expected a duration such as '5m'"
        ));
    }
}

fn validate_collection(config: &MigrationConfig, coll: &CollectionConfig, errors: &mut Vec<String>) {
    let ctx = format!("collection '{}'", coll.name);

    for (label, dir) in [
        ("data_dir", &coll.data_dir),
        ("tmp_dir", &coll.tmp_dir),
        ("log_dir", &coll.log_dir),
    ] {
        if dir.as_os_str().is_empty() {
            errors.push(format!("{ctx}: {label} must not be empty"));
        }
    }

    match &coll.extract {
        ExtractConfig::File { path, tag_field, .. } => {
            if path.as_os_str().is_empty() {
                errors.push(format!("{ctx}: extract path must not be empty"));
            }
            if tag_field.trim().is_empty() {
                errors.push(format!("{ctx}: tag_field must not be empty"));
            }
        }
        ExtractConfig::Search {
            index,
            page_size,
            keep_alive,
            tag_field,
            ..
        } => {
            if config.source.is_none() {
                errors.push(format!("{ctx}: search extraction requires a 'source' section"));
            }
            if index.trim().is_empty() {
                errors.push(format!("{ctx}: extract index must not be empty"));
            }
            if *page_size == 0 {
                errors.push(format!("{ctx}: page_size must be at least 1"));
            }
            if tag_field.trim().is_empty() {
                errors.push(format!("{ctx}: tag_field must not be empty"));
            }
            validate_keep_alive(keep_alive, &ctx, errors);
        }
    }

    for model in &coll.transform.models {
        if model.trim().is_empty() {
            errors.push(format!("{ctx}: transform model names must not be empty"));
        }
    }
}

fn validate_stats(config: &MigrationConfig, stats: &StatsConfig, errors: &mut Vec<String>) {
    if config.source.is_none() {
        errors.push("stats: replication requires a 'source' section".to_string());
    }
    if config
        .destination
        .as_ref()
        .and_then(|d| d.search_url.as_ref())
        .is_none()
    {
        errors.push("stats: replication requires destination.search_url".to_string());
    }
    if stats.collections.is_empty() {
        errors.push("stats: at least one collection must be listed".to_string());
    }
    for name in &stats.collections {
        if config.collection(name).is_none() {
            errors.push(format!("stats: unknown collection '{name}'"));
        }
    }
    if stats.event_types.is_empty() {
        errors.push("stats: at least one event type must be configured".to_string());
    }
    for (event_type, cfg) in &stats.event_types {
        if cfg.source_indices.is_empty() {
            errors.push(format!("stats.event_types.{event_type}: source_indices must not be empty"));
        }
        if cfg.source_indices.iter().any(|i| i.trim().is_empty()) {
            errors.push(format!("stats.event_types.{event_type}: empty source index name"));
        }
        if cfg.dest_index_prefix.trim().is_empty() {
            errors.push(format!(
                "stats.event_types.{event_type}: dest_index_prefix must not be empty"
            ));
        }
    }
    if stats.entity_field.trim().is_empty() {
        errors.push("stats: entity_field must not be empty".to_string());
    }
    if stats.page_size == 0 {
        errors.push("stats: page_size must be at least 1".to_string());
    }
    if stats.bulk_size == 0 {
        errors.push("stats: bulk_size must be at least 1".to_string());
    }
    if stats.workers == 0 {
        errors.push("stats: workers must be at least 1".to_string());
    }
    validate_keep_alive(&stats.keep_alive, "stats", errors);
}

/// Validate a parsed migration configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_migration(config: &MigrationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported migration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.migration.trim().is_empty() {
        errors.push("Migration name must not be empty".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }

    if let Some(source) = &config.source {
        if source.url.trim().is_empty() {
            errors.push("source.url must not be empty".to_string());
        }
    }
    if let Some(dest) = &config.destination {
        if dest.url.trim().is_empty() {
            errors.push("destination.url must not be empty".to_string());
        }
        if dest.legacy_id_field.trim().is_empty() {
            errors.push("destination.legacy_id_field must not be empty".to_string());
        }
    }

    if config.collections.is_empty() {
        errors.push("At least one collection must be configured".to_string());
    }

    let mut seen = HashSet::new();
    for (i, coll) in config.collections.iter().enumerate() {
        if coll.name.trim().is_empty() {
            errors.push(format!("Collection {i} has an empty name"));
            continue;
        }
        if !seen.insert(coll.name.as_str()) {
            errors.push(format!("Duplicate collection name '{}'", coll.name));
        }
        validate_collection(config, coll, &mut errors);
    }

    if let Some(stats) = &config.stats {
        validate_stats(config, stats, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Migration validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_migration_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
migration: test_migration
source:
  url: http://legacy:9200
destination:
  url: https://rdm.example.org
  search_url: http://rdm-search:9200
collections:
  - name: books
    data_dir: /data/books
    tmp_dir: /tmp/books
    log_dir: /var/log/books
    extract:
      kind: file
      path: dump.json
stats:
  collections: [books]
  event_types:
    download:
      source_indices: [cds-events-download]
      dest_index_prefix: events-stats-file-download
"#
    }

    #[test]
    fn test_valid_migration_passes() {
        let config = parse_migration_str(valid_yaml()).unwrap();
        assert!(validate_migration(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_migration_str(&yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported migration version"));
    }

    #[test]
    fn test_empty_migration_name_fails() {
        let yaml = valid_yaml().replace("test_migration", "\"\"");
        let config = parse_migration_str(&yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("Migration name must not be empty"));
    }

    #[test]
    fn test_duplicate_collection_fails() {
        let yaml = r#"
version: "1.0"
migration: m
collections:
  - { name: books, data_dir: /d, tmp_dir: /t, log_dir: /l, extract: { kind: file, path: a.json } }
  - { name: books, data_dir: /d, tmp_dir: /t, log_dir: /l, extract: { kind: file, path: b.json } }
"#;
        let config = parse_migration_str(yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("Duplicate collection name 'books'"));
    }

    #[test]
    fn test_search_extract_requires_source() {
        let yaml = r#"
version: "1.0"
migration: m
collections:
  - name: videos
    data_dir: /d
    tmp_dir: /t
    log_dir: /l
    extract: { kind: search, index: legacy, page_size: 0, keep_alive: forever }
"#;
        let config = parse_migration_str(yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("requires a 'source' section"));
        assert!(err.contains("page_size must be at least 1"));
        assert!(err.contains("invalid keep_alive 'forever'"));
    }

    #[test]
    fn test_stats_unknown_collection_fails() {
        let yaml = valid_yaml().replace("collections: [books]", "collections: [films]");
        let config = parse_migration_str(&yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("unknown collection 'films'"));
    }

    #[test]
    fn test_stats_requires_destination_search_url() {
        let yaml = valid_yaml().replace("  search_url: http://rdm-search:9200\n", "");
        let config = parse_migration_str(&yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("destination.search_url"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = r#"
version: "0.9"
migration: ""
retry: { max_attempts: 0 }
collections: []
"#;
        let config = parse_migration_str(yaml).unwrap();
        let err = validate_migration(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported migration version"));
        assert!(err.contains("Migration name must not be empty"));
        assert!(err.contains("retry.max_attempts"));
        assert!(err.contains("At least one collection"));
    }
}
