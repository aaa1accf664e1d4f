//! Migration YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::MigrationConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        if let Ok(val) = std::env::var(var_name) {
            val
        } else {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        }
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a migration YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_migration_str(yaml_str: &str) -> Result<MigrationConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: MigrationConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse migration YAML")?;
    Ok(config)
}

/// Parse a migration YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_migration(path: &Path) -> Result<MigrationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read migration file: {}", path.display()))?;
    parse_migration_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExtractConfig;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FERRY_TEST_HOST", "search.example.org");
        let input = "url: http://${FERRY_TEST_HOST}:9200";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url: http://search.example.org:9200");
        std::env::remove_var("FERRY_TEST_HOST");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("FERRY_TEST_A", "alpha");
        std::env::set_var("FERRY_TEST_B", "beta");
        let input = "${FERRY_TEST_A} and ${FERRY_TEST_B} and ${FERRY_TEST_A}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "alpha and beta and alpha");
        std::env::remove_var("FERRY_TEST_A");
        std::env::remove_var("FERRY_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "migration: books\nfail_fast: false";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_missing_env_vars_all_reported_once() {
        let input = "${FERRY_MISSING_X} ${FERRY_MISSING_Y} ${FERRY_MISSING_X}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("FERRY_MISSING_X"));
        assert!(err_msg.contains("FERRY_MISSING_Y"));
        assert_eq!(err_msg.matches("FERRY_MISSING_X").count(), 1);
    }

    #[test]
    fn test_parse_migration_from_string() {
        std::env::set_var("FERRY_TEST_TOKEN", "s3cret");
        let yaml = r#"
version: "1.0"
migration: cds-to-rdm
destination:
  url: https://rdm.example.org
  token: ${FERRY_TEST_TOKEN}
collections:
  - name: books
    data_dir: /data/books
    tmp_dir: /tmp/ferry/books
    log_dir: /var/log/ferry/books
    extract:
      kind: file
      path: dump.json
      tag_field: tag
    transform:
      models: [book]
"#;
        let config = parse_migration_str(yaml).unwrap();
        assert_eq!(config.migration, "cds-to-rdm");
        let dest = config.destination.as_ref().unwrap();
        assert_eq!(dest.token.as_deref(), Some("s3cret"));
        assert_eq!(dest.legacy_id_field, "legacy_recid");
        let books = config.collection("books").unwrap();
        assert_eq!(books.transform.models, vec!["book".to_string()]);
        assert!(matches!(
            &books.extract,
            ExtractConfig::File { tag_field, .. } if tag_field == "tag"
        ));
        assert!(!config.fail_fast);
        assert_eq!(config.retry.max_attempts, 10);
        std::env::remove_var("FERRY_TEST_TOKEN");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_migration_str(yaml).is_err());
    }

    #[test]
    fn test_parse_unknown_extract_kind_errors() {
        let yaml = r#"
version: "1.0"
migration: m
collections:
  - name: books
    data_dir: /d
    tmp_dir: /t
    log_dir: /l
    extract: { kind: ftp, path: x }
"#;
        assert!(parse_migration_str(yaml).is_err());
    }

    #[test]
    fn test_parse_migration_file_not_found() {
        let err_msg = parse_migration(Path::new("/nonexistent/migration.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Failed to read migration file"));
    }
}
