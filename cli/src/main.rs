//! chainwatch CLI — inspect and rewind watcher sync state.
//!
//! Usage:
//! ```bash
//! chainwatch status --db ./watcher.db
//! chainwatch reset  --db postgresql://localhost/chainwatch --block-number 19000000
//! chainwatch info   --config ./watcher.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainwatch_core::{reset_to_block, Store, SyncStatus, WatcherConfig};
use chainwatch_storage::postgres::PostgresStore;
use chainwatch_storage::sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Inspect and rewind chainwatch sync state")]
struct Cli {
    /// Log level filter, e.g. "info" or "chainwatch_core=debug". `RUST_LOG` wins if set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sync status pointers
    Status {
        /// SQLite path or postgresql:// URL
        #[arg(long)]
        db: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rewind all state to a completed block height
    Reset {
        #[arg(long)]
        db: String,
        #[arg(long)]
        block_number: u64,
    },
    /// Print the effective watcher configuration
    Info {
        /// JSON config file; defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.cmd {
        Command::Status { db, json } => cmd_status(&db, json).await,
        Command::Reset { db, block_number } => cmd_reset(&db, block_number).await,
        Command::Info { config } => cmd_info(config),
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn open_store(db: &str) -> Result<Arc<dyn Store>> {
    if db.starts_with("postgres://") || db.starts_with("postgresql://") {
        let store = PostgresStore::connect(db)
            .await
            .with_context(|| format!("connecting to {db}"))?;
        Ok(Arc::new(store))
    } else {
        let store = SqliteStore::open(db)
            .await
            .with_context(|| format!("opening {db}"))?;
        Ok(Arc::new(store))
    }
}

async fn cmd_status(db: &str, json: bool) -> Result<()> {
    let store = open_store(db).await?;
    let Some(status) = store.sync_status().await.context("reading sync status")? else {
        println!("No sync status recorded yet.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &SyncStatus) {
    println!("Sync status");
    println!("  Chain head:        {}", status.chain_head);
    println!("  Latest indexed:    {}", status.latest_indexed);
    println!("  Latest canonical:  {}", status.latest_canonical);
    println!("  Initial indexed:   {}", status.initial_indexed);
    println!("  Reorg lag:         {} blocks", status.reorg_lag());
}

async fn cmd_reset(db: &str, block_number: u64) -> Result<()> {
    let store = open_store(db).await?;
    let target = reset_to_block(store.as_ref(), block_number)
        .await
        .with_context(|| format!("resetting to block {block_number}"))?;
    info!(block_number = target.number, block_hash = %target.hash, "reset complete");
    println!("Reset to block {target}");
    Ok(())
}

fn cmd_info(path: Option<PathBuf>) -> Result<()> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            WatcherConfig::from_json(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => WatcherConfig::default(),
    };

    println!("chainwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backends: memory, SQLite, PostgreSQL");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
