use std::path::Path;

use anyhow::{Context, Result};

use ferry_engine::check_migration;
use ferry_engine::config::parser;

/// Execute the `check` command: validate configuration, state database, and
/// per-collection settings.
pub fn execute(config_path: &Path) -> Result<()> {
    // 1. Parse migration YAML
    let config = parser::parse_migration(config_path)
        .with_context(|| format!("Failed to parse migration: {}", config_path.display()))?;

    // 2. Validate and resolve
    let result = check_migration(&config)?;

    // 3. Report results
    for collection in &result.collections {
        println!("Collection '{}':", collection.name);
        println!("  Extract:   {} ({})", collection.extract_kind, collection.source);
        println!("  Data dir:  {}", collection.data_dir.display());
        println!("  Tmp dir:   {}", collection.tmp_dir.display());
        println!("  Log dir:   {}", collection.log_dir.display());
        println!("  Models:    {}", collection.models.join(", "));
    }

    if result.state_ok {
        println!("State backend:     OK");
    } else {
        println!("State backend:     FAILED");
    }
    for problem in &result.problems {
        println!("Problem: {problem}");
    }

    if result.is_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
