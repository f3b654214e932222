use std::path::PathBuf;

use anyhow::{Context, Result};
use cardwatch_core::EventId;
use cardwatch_storage::Store;
use cardwatch_sync::{connect_store, maybe_build_scheduler, scheduler_from_env, SyncConfig};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cardwatch")]
#[command(about = "Fight card ingestion and result-window scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover events and bouts and merge them into the store.
    Ingest {
        /// Read records from a JSONL file instead of running the extractor.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Fire every result window that is due, once.
    Tick {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Evaluate windows as of this RFC 3339 instant instead of now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run ticks on the configured cron schedule until Ctrl-C.
    Watch {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Migrate,
    /// Mark an event completed; ingestion leaves it alone afterwards.
    CompleteEvent { event_id: EventId },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest { file: None }) {
        Commands::Ingest { file } => {
            let (report, dir) = cardwatch_sync::run_ingest_from_env(file).await?;
            let s = &report.stats;
            println!(
                "ingest complete: run_id={} events(+{} ~{} ={}) bouts(+{} ~{} ={}) store_errors={} reports={}",
                report.run_id,
                s.events_inserted,
                s.events_updated,
                s.events_skipped_completed,
                s.bouts_inserted,
                s.bouts_updated,
                s.bouts_skipped_final,
                s.store_errors,
                dir.display()
            );
        }
        Commands::Tick { file, at } => {
            let (_, scheduler) = scheduler_from_env(file).await?;
            let summary = scheduler.tick(at.unwrap_or_else(Utc::now)).await?;
            println!(
                "tick complete: checked={} fired={} failed={} unresolvable={}",
                summary.events_checked, summary.fired, summary.failed, summary.unresolvable
            );
        }
        Commands::Watch { file } => {
            let (config, scheduler) = scheduler_from_env(file).await?;
            let Some(mut sched) = maybe_build_scheduler(&config, scheduler).await? else {
                anyhow::bail!("scheduler disabled; set CARDWATCH_SCHEDULER_ENABLED=1");
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!(cron = %config.tick_cron, "watching for due result windows");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let store = connect_store(&SyncConfig::from_env()).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::CompleteEvent { event_id } => {
            let store = connect_store(&SyncConfig::from_env()).await?;
            let changed = store
                .complete_event(event_id)
                .await
                .with_context(|| format!("completing event {event_id}"))?;
            if changed {
                println!("event {event_id} marked completed");
            } else {
                println!("event {event_id} not found or already completed");
            }
        }
    }

    Ok(())
}
