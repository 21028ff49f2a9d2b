use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use portal_sync::config::SyncConfig;
use portal_sync::runtime::SyncRuntime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mirror a local directory tree into a document portal.
#[derive(Debug, Parser)]
#[command(name = "portal-sync", version, about)]
struct Cli {
    /// Log at debug level (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Walk the tree and record every entry in the local inventory
    Inventory {
        /// Directory to walk instead of PORTAL_SYNC_ROOT
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Queue the tree and upload every pending entry, level by level
    Upload {
        /// Directory to upload instead of PORTAL_SYNC_ROOT
        #[arg(long)]
        root: Option<PathBuf>,
        /// Resume the existing queue without walking the tree again
        #[arg(long)]
        skip_scan: bool,
    },
    /// Fetch portal metadata for every inventoried entry
    FetchMetadata,
    /// Copy synced inventory rows into the published record set
    Publish,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = SyncConfig::from_env();
    let runtime = SyncRuntime::bootstrap(config).await?;
    let result = match command {
        Command::Inventory { root } => runtime
            .inventory(root.as_deref())
            .await
            .map(|count| info!(entries = count, "inventory complete")),
        Command::Upload { root, skip_scan } => runtime
            .upload(root.as_deref(), skip_scan)
            .await
            .map(|report| {
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "upload complete"
                )
            }),
        Command::FetchMetadata => runtime
            .fetch_metadata()
            .await
            .map(|report| info!(rows_updated = report.rows_updated, "metadata complete")),
        Command::Publish => runtime
            .publish()
            .await
            .map(|count| info!(records = count, "publish complete")),
    };
    runtime.close().await;
    result
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("portal_sync=debug,portal_core=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
