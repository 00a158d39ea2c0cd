//! docsync command line
//!
//! Inspects and drains the durable operation queue outside of an application.

use clap::{Parser, Subcommand};
use docsync::client::local_db::{DurableStore, LocalDatabase, SqliteStore};
use docsync::client::{HttpRemote, SyncService};
use docsync::shared::SyncConfig;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "docsync", version, about = "Offline-first sync queue tool")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Queue database, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List queued operations in replay order
    Pending,
    /// Show queue statistics
    Stats,
    /// Replay the queue against the server once
    Drain,
    /// Drop a queued operation without sending it
    Discard {
        /// Operation id
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "docsync=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::builder().env().build()?,
    };
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }

    match cli.command {
        Command::Pending => {
            let store = open_store(&config).await?;
            for op in store.get_all().await? {
                println!(
                    "{}  {:<6}  {:<9}  {:<24}  retries={}  enqueued={}",
                    op.id,
                    op.kind.as_str(),
                    op.table.as_str(),
                    op.target.as_deref().unwrap_or("-"),
                    op.retry_count,
                    op.enqueued_at.to_rfc3339(),
                );
            }
        }
        Command::Stats => {
            let db = LocalDatabase::open(config.resolved_database_path()).await?;
            let stats = db.get_stats().await?;
            println!("pending operations: {}", stats.pending_operations);
            println!("max retry count:    {}", stats.max_retry_count);
            match stats.oldest_enqueued_at {
                Some(at) => println!("oldest enqueued:    {at}"),
                None => println!("oldest enqueued:    -"),
            }
            db.close().await;
        }
        Command::Drain => {
            let remote = Arc::new(HttpRemote::from_config(&config)?);
            let service = SyncService::init(config, remote).await?;
            let report = service.force_sync().await?;
            println!(
                "attempted={} succeeded={} retried={} dead_lettered={} rejected={}",
                report.attempted,
                report.succeeded,
                report.retried,
                report.dead_lettered,
                report.rejected,
            );
            service.dispose().await;
        }
        Command::Discard { id } => {
            let store = open_store(&config).await?;
            if store.get_all().await?.iter().any(|op| op.id == id) {
                store.delete(id).await?;
                tracing::info!(operation_id = %id, "Operation discarded");
            } else {
                eprintln!("no queued operation {id}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn open_store(config: &SyncConfig) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    let db = LocalDatabase::open(config.resolved_database_path()).await?;
    Ok(SqliteStore::new(db))
}
