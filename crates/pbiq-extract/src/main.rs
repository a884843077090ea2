//! pbiq Extract - report query extraction tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pbiq_common::logging::{init_logging, LogConfig, LogLevel};
use pbiq_extract::config::ArchiveToolKind;
use pbiq_extract::{EntryErrorPolicy, ExtractConfig, PgDestination, Pipeline};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pbiq-extract")]
#[command(author, version, about = "Extract Power BI report queries into a table")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the destination table with the queries of every report
    Run {
        /// Root of the local extraction folders
        #[arg(long)]
        local_root: Option<PathBuf>,

        /// skip or abort when one report fails
        #[arg(long)]
        on_entry_error: Option<EntryErrorPolicy>,

        /// seven-zip or native
        #[arg(long)]
        extractor: Option<ArchiveToolKind>,
    },

    /// List the catalog entries that a run would process
    List,

    /// Create the destination table if it does not exist
    InitDestination,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pbiq-extract")
        .filter_directives("pbiq_extract=debug,sqlx=warn,reqwest=info")
        .build()
        .merge_env(|key| std::env::var(key).ok())
        .context("Invalid logging configuration")?;

    let _guard = init_logging(&log_config)?;

    let mut config = ExtractConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Command::Run {
            local_root,
            on_entry_error,
            extractor,
        } => {
            if let Some(local_root) = local_root {
                config.local_root = local_root;
            }
            if let Some(policy) = on_entry_error {
                config.on_entry_error = policy;
            }
            if let Some(tool) = extractor {
                config.archive.tool = tool;
            }

            let summary = Pipeline::from_config(&config)?
                .run()
                .await
                .context("Extraction run failed")?;

            for failure in &summary.failures {
                warn!(
                    item_id = %failure.item_id,
                    path = %failure.path,
                    phase = %failure.phase,
                    error = %failure.error,
                    "Report skipped"
                );
            }
            info!(
                loaded = summary.loaded,
                entries = summary.entries,
                skipped = summary.skipped(),
                "Done"
            );
        },
        Command::List => {
            let entries = Pipeline::from_config(&config)?
                .list()
                .await
                .context("Failed to list the catalog")?;
            for entry in entries {
                println!("{}\t{}", entry.item_id, entry.path);
            }
        },
        Command::InitDestination => {
            config.validate()?;
            PgDestination::new(&config.destination.connection, config.destination.table)?
                .create_table()
                .await
                .context("Failed to create the destination table")?;
        },
    }

    Ok(())
}
