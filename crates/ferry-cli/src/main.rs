mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Migrate legacy repository records and usage statistics"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the configured collections
    Run {
        /// Path to migration YAML file
        config: PathBuf,
        /// Extract and transform only; write previews to the journal
        #[arg(long)]
        dry_run: bool,
        /// Run only this collection
        #[arg(long)]
        collection: Option<String>,
        /// Maximum entries to process per collection
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Validate configuration, state database, and collection settings
    Check {
        /// Path to migration YAML file
        config: PathBuf,
    },
    /// Replicate usage statistics of migrated entities
    Stats {
        /// Path to migration YAML file
        config: PathBuf,
        /// Parallel workers (overrides `stats.workers`)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// List registered transform models
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run {
            config,
            dry_run,
            collection,
            limit,
        } => commands::run::execute(&config, dry_run, collection, limit).await,
        Commands::Check { config } => commands::check::execute(&config),
        Commands::Stats { config, workers } => commands::stats::execute(&config, workers).await,
        Commands::Models => commands::models::execute(),
    }
}
