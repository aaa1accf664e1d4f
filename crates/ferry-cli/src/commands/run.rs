use std::path::Path;

use anyhow::{Context, Result};

use ferry_engine::config::{parser, validator};
use ferry_engine::{CollectionReport, ExecutionOptions, Orchestrator, RunSummary};

/// Execute the `run` command: parse, validate, and migrate collections.
pub async fn execute(
    config_path: &Path,
    dry_run: bool,
    collection: Option<String>,
    limit: Option<u64>,
) -> Result<()> {
    // 1. Parse migration YAML
    let config = parser::parse_migration(config_path)
        .with_context(|| format!("Failed to parse migration: {}", config_path.display()))?;

    // 2. Validate
    validator::validate_migration(&config)?;

    tracing::info!(
        migration = config.migration,
        collections = config.collections.len(),
        has_destination = config.destination.is_some(),
        "Migration validated"
    );

    // 3. Run
    let orchestrator = Orchestrator::from_config(config)?;
    let options = ExecutionOptions {
        dry_run,
        limit,
        collection,
    };
    let summary = orchestrator.run(&options).await?;

    print_summary(&summary);

    let failed: Vec<&str> = summary.failed().map(|c| c.collection.as_str()).collect();
    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Collection(s) failed: {}", failed.join(", "))
    }
}

fn print_summary(summary: &RunSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!("Migration '{}'{mode} finished in {:.2}s.", summary.migration, summary.duration_secs);
    for report in &summary.collections {
        print_collection(report);
    }
}

fn print_collection(report: &CollectionReport) {
    println!();
    println!("Collection '{}': {}", report.collection, report.status.as_str());
    println!("  Entries read:      {}", report.stats.entries_read);
    println!("  Transformed:       {}", report.transformed);
    println!("  Migrated:          {}", report.stats.entries_migrated);
    println!("  Already migrated:  {}", report.stats.entries_already_migrated);
    println!("  Skipped:           {}", report.stats.entries_skipped);
    println!("  Duration:          {:.2}s", report.duration_secs);
    if !report.unmapped.is_empty() {
        println!("  Unmapped fields:   {}", report.unmapped.len());
    }
    if let Some(journal) = &report.journal {
        println!("  Journal:           {}", journal.log_dir.display());
    }
    if let Some(reason) = report.failure() {
        println!("  Failure:           {reason}");
    }
}
