use std::path::Path;

use anyhow::{Context, Result};

use ferry_engine::config::{parser, validator};
use ferry_engine::Orchestrator;

/// Execute the `stats` command: replicate usage events of migrated entities
/// and print the reconciliation.
pub async fn execute(config_path: &Path, workers: Option<usize>) -> Result<()> {
    let config = parser::parse_migration(config_path)
        .with_context(|| format!("Failed to parse migration: {}", config_path.display()))?;
    validator::validate_migration(&config)?;

    let orchestrator = Orchestrator::from_config(config)?;
    let report = orchestrator.run_stats(workers).await?;

    println!("Statistics replication finished.");
    println!("  Events read:       {}", report.read());
    println!("  Events created:    {}", report.created());
    println!("  Already present:   {}", report.conflicts());
    println!("  Skipped entities:  {}", report.errors.len());
    println!("  Reconciled pairs:  {}", report.reconciliations.len());

    let mismatches: Vec<_> = report.mismatches().collect();
    if !mismatches.is_empty() {
        println!("  Count mismatches:");
        for m in mismatches {
            println!(
                "    {} -> {} [{}]: legacy {} / destination {}",
                m.legacy_id, m.new_id, m.event_type, m.legacy_count, m.dest_count
            );
        }
    }
    Ok(())
}
