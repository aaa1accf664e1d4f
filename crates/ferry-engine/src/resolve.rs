//! State backend creation and external service resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ferry_state::{SqliteStateBackend, StateBackend};

use crate::config::types::MigrationConfig;
use crate::http::{HttpRecordService, HttpSearchClient};
use crate::service::{RecordService, SearchClient};

/// Default state database location when none is configured.
fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ferry").join("state.db")
}

pub(crate) fn create_state_backend(config: &MigrationConfig) -> Result<Arc<dyn StateBackend>> {
    let backend = if let Some(path) = &config.state.connection {
        SqliteStateBackend::open(Path::new(path)).context("Failed to open state DB")?
    } else {
        SqliteStateBackend::open(&default_state_path())
            .context("Failed to open default state DB")?
    };
    Ok(Arc::new(backend) as Arc<dyn StateBackend>)
}

pub(crate) fn check_state_backend(config: &MigrationConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {e:#}");
            false
        }
    }
}

/// External services named by a configuration. Absent sections stay `None`.
#[derive(Default)]
pub(crate) struct ResolvedServices {
    pub(crate) records: Option<Arc<dyn RecordService>>,
    pub(crate) source_search: Option<Arc<dyn SearchClient>>,
    pub(crate) dest_search: Option<Arc<dyn SearchClient>>,
}

pub(crate) fn resolve_services(config: &MigrationConfig) -> ResolvedServices {
    let source_search = config.source.as_ref().map(|source| {
        Arc::new(HttpSearchClient::new(&source.url, source.timeout_secs)) as Arc<dyn SearchClient>
    });
    let Some(dest) = &config.destination else {
        return ResolvedServices {
            source_search,
            ..ResolvedServices::default()
        };
    };
    let records = Arc::new(HttpRecordService::new(
        &dest.url,
        dest.token.clone(),
        &dest.legacy_id_field,
        dest.timeout_secs,
    )) as Arc<dyn RecordService>;
    let dest_search = dest.search_url.as_ref().map(|url| {
        Arc::new(HttpSearchClient::new(url, dest.timeout_secs)) as Arc<dyn SearchClient>
    });
    tracing::debug!(
        destination = dest.url.as_str(),
        has_source = source_search.is_some(),
        has_dest_search = dest_search.is_some(),
        "Resolved external services"
    );
    ResolvedServices {
        records: Some(records),
        source_search,
        dest_search,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_migration_str;
    use ferry_types::state::CollectionName;
    use tempfile::tempdir;

    fn config_with_state(db: &Path, extra: &str) -> MigrationConfig {
        parse_migration_str(&format!(
            "version: \"1.0\"\nmigration: test\nstate:\n  connection: {}\ncollections: []\n{extra}",
            db.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_create_state_backend_custom_path() {
        let dir = tempdir().unwrap();
        let config = config_with_state(&dir.path().join("state.db"), "");

        let backend = create_state_backend(&config).unwrap();
        let run_id = backend.start_run(&CollectionName::new("books")).unwrap();
        assert!(run_id > 0);
        assert!(check_state_backend(&config));
    }

    #[test]
    fn test_resolve_services_follows_config_sections() {
        let dir = tempdir().unwrap();
        let bare = config_with_state(&dir.path().join("a.db"), "");
        let services = resolve_services(&bare);
        assert!(services.records.is_none());
        assert!(services.source_search.is_none());

        let full = config_with_state(
            &dir.path().join("b.db"),
            "source:\n  url: http://legacy:9200\ndestination:\n  url: https://rdm.test\n  search_url: http://rdm-search:9200\n",
        );
        let services = resolve_services(&full);
        assert!(services.records.is_some());
        assert!(services.source_search.is_some());
        assert!(services.dest_search.is_some());
    }
}
