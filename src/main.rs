// ABOUTME: CLI entry point for sqlmirror
// ABOUTME: Parses commands, sets up logging and routes to the command handlers

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlmirror::commands::{self, Outcome};
use sqlmirror::AppConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sqlmirror")]
#[command(about = "Keep a sink database in sync with a source database", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "SQLMIRROR_CONFIG",
        default_value = "sqlmirror.toml"
    )]
    config: PathBuf,
    /// Set the log level explicitly (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log: Option<String>,
    /// Log progress information
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log debug information, including every executed statement
    #[arg(short, long, global = true)]
    debug: bool,
    /// Prefix log lines with timestamps
    #[arg(short, long, global = true)]
    timestamp: bool,
    /// Append failed sync statements to this file instead of the configured one
    #[arg(long = "log-sync-errors-to", global = true)]
    log_sync_errors_to: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the DDL that makes the sink schema match the source (exit 1 on differences)
    CompareTables {
        /// Only compare this table
        table: Option<String>,
    },
    /// Print the statements a sync would run (exit 1 on differences)
    CompareData {
        /// Only compare this table
        table: Option<String>,
    },
    /// Make the sink data equal to the source
    SyncData {
        /// Only sync this table
        table: Option<String>,
    },
    /// Stream source changes to the sink with an initial and nightly full sync
    StreamData {
        /// Only stream this table
        table: Option<String>,
    },
    /// Stream source changes to the sink without full syncs
    StreamDataNoSync {
        /// Only stream this table
        table: Option<String>,
    },
    /// List source tables with size estimates
    ShowSourceTables,
    /// List sink tables with size estimates
    ShowSinkTables,
}

impl Cli {
    fn log_level(&self) -> String {
        if let Some(level) = &self.log {
            level.clone()
        } else if self.debug {
            "debug".to_string()
        } else if self.verbose {
            "info".to_string()
        } else {
            "warn".to_string()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the command line flags
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.timestamp {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    let error_log = cli.log_sync_errors_to.clone();

    let outcome = match cli.command {
        Commands::CompareTables { table } => {
            commands::compare_tables(&config, table.as_deref()).await?
        }
        Commands::CompareData { table } => {
            commands::compare_data(&config, table.as_deref(), error_log).await?
        }
        Commands::SyncData { table } => {
            commands::sync_data(&config, table.as_deref(), error_log).await?;
            Outcome::InSync
        }
        Commands::StreamData { table } => {
            commands::stream_data(&config, table.as_deref(), error_log, true).await?;
            Outcome::InSync
        }
        Commands::StreamDataNoSync { table } => {
            commands::stream_data(&config, table.as_deref(), error_log, false).await?;
            Outcome::InSync
        }
        Commands::ShowSourceTables => {
            commands::show_tables(&config.source).await?;
            Outcome::InSync
        }
        Commands::ShowSinkTables => {
            commands::show_tables(&config.sink).await?;
            Outcome::InSync
        }
    };

    if outcome == Outcome::Changed {
        std::process::exit(outcome.exit_code());
    }
    Ok(())
}
