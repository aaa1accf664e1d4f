//! Execution mode types for migration runs.

/// Runtime execution options (not part of the migration YAML).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Extract and transform, but write nothing to the destination or the
    /// state database. Transformed records go to the preview journal.
    pub dry_run: bool,
    /// Maximum entries to process per collection.
    pub limit: Option<u64>,
    /// Run only the named collection.
    pub collection: Option<String>,
}

impl ExecutionOptions {
    /// Whether `name` is selected by these options.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        self.collection.as_deref().map_or(true, |only| only == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_options_default_is_normal_mode() {
        let opts = ExecutionOptions::default();
        assert!(!opts.dry_run);
        assert!(opts.limit.is_none());
        assert!(opts.selects("anything"));
    }

    #[test]
    fn test_collection_selector() {
        let opts = ExecutionOptions {
            collection: Some("books".into()),
            ..ExecutionOptions::default()
        };
        assert!(opts.selects("books"));
        assert!(!opts.selects("videos"));
    }
}
