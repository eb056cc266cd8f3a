//! # growdashd, the growdash scheduling daemon
//!
//! Composition root that wires the storage adapter into the scheduling and
//! command-lifecycle use-cases.
//!
//! ## Responsibilities
//! - Parse configuration (CLI args, env vars, config file)
//! - Initialize logging
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct the stores and the in-process command bus
//! - Run one trigger on demand, or all of them periodically in `serve`
//! - Stop cleanly on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Interval, MissedTickBehavior};

use growdash_adapter_storage_sqlite_sqlx::{
    Config as StorageConfig, SqliteCommandStore, SqliteEventStore, SqliteOccurrenceLedger,
};
use growdash_app::command_bus::InProcessCommandBus;
use growdash_app::lifecycle::{CommandLifecycle, ReclaimReport};
use growdash_app::scheduler::{EventScheduler, RunMode, RunReport};
use growdash_domain::command::CommandStatus;
use growdash_domain::time::{self, minutes};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "growdashd",
    version,
    about = "growdash - fires scheduled device commands and times out stuck ones"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calendar event triggers
    #[command(subcommand)]
    Events(EventsCommand),
    /// Device command triggers
    #[command(subcommand)]
    Commands(CommandsCommand),
    /// Run every trigger periodically until interrupted
    Serve,
}

#[derive(Subcommand)]
enum EventsCommand {
    /// Fire occurrences due around now
    RunScheduled {
        /// Window radius in minutes (defaults to the configured value)
        #[arg(long)]
        window: Option<u64>,
        /// Log what would fire without enqueuing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum CommandsCommand {
    /// Fail pending commands no agent picked up
    Timeout {
        /// Minutes before a pending command times out
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Fail executing commands that stopped reporting
    TimeoutExecuting {
        /// Minutes before an executing command times out
        #[arg(long)]
        minutes: Option<u64>,
    },
}

type Scheduler = EventScheduler<SqliteEventStore, SqliteOccurrenceLedger>;
type Lifecycle = CommandLifecycle<SqliteCommandStore, Arc<InProcessCommandBus>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config.logging.filter)?;

    // Database
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let pool = db.pool().clone();

    // Command bus
    let bus = Arc::new(InProcessCommandBus::new(256));

    // Use-cases
    let scheduler = EventScheduler::new(
        SqliteEventStore::new(pool.clone()),
        SqliteOccurrenceLedger::new(pool.clone()),
    );
    let lifecycle = CommandLifecycle::new(
        SqliteCommandStore::new(pool),
        Arc::clone(&bus),
        config.lifecycle(),
    );

    match cli.command {
        Commands::Events(EventsCommand::RunScheduled { window, dry_run }) => {
            let radius = window.map_or_else(|| config.window_radius(), minutes);
            let mode = if dry_run || config.scheduler.dry_run {
                RunMode::DryRun
            } else {
                RunMode::Live
            };
            let report = scheduler.run(time::now(), radius, mode).await?;
            print_run(&report);
        }
        Commands::Commands(CommandsCommand::Timeout { minutes: threshold }) => {
            let threshold = threshold.map_or(config.lifecycle().pending_timeout, minutes);
            let report = lifecycle
                .reclaim_timed_out(time::now(), threshold, CommandStatus::Pending)
                .await?;
            print_reclaim("pending", &report);
        }
        Commands::Commands(CommandsCommand::TimeoutExecuting { minutes: threshold }) => {
            let threshold = threshold.map_or(config.lifecycle().executing_timeout, minutes);
            let report = lifecycle
                .reclaim_timed_out(time::now(), threshold, CommandStatus::Executing)
                .await?;
            print_reclaim("executing", &report);
        }
        Commands::Serve => serve(&config, &scheduler, &lifecycle, &bus).await?,
    }

    Ok(())
}

fn init_tracing(filter: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(filter)?)
        .with(fmt::layer())
        .init();

    Ok(())
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn serve(
    config: &Config,
    scheduler: &Scheduler,
    lifecycle: &Lifecycle,
    bus: &InProcessCommandBus,
) -> Result<()> {
    let mode = if config.scheduler.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Live
    };
    let radius = config.window_radius();

    let mut feed = bus.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(change) => tracing::info!(
                    command_id = %change.command_id,
                    device_id = %change.device_id,
                    status = %change.status,
                    result = change.result_message.as_deref(),
                    "command status changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut scheduler_tick = ticker(config.scheduler_period());
    let mut pending_tick = ticker(config.pending_sweep_period());
    let mut executing_tick = ticker(config.executing_sweep_period());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(?mode, window = ?radius, "growdashd serving");

    loop {
        tokio::select! {
            _ = scheduler_tick.tick() => {
                if let Err(err) = scheduler.run(time::now(), radius, mode).await {
                    tracing::error!(error = %err, "scheduler run failed");
                }
            }
            _ = pending_tick.tick() => {
                if let Err(err) = lifecycle.reclaim_pending(time::now()).await {
                    tracing::error!(error = %err, "pending sweep failed");
                }
            }
            _ = executing_tick.tick() => {
                if let Err(err) = lifecycle.reclaim_executing(time::now()).await {
                    tracing::error!(error = %err, "executing sweep failed");
                }
            }
            signal = &mut shutdown => {
                signal?;
                tracing::info!("shutting down");
                break;
            }
        }
    }

    watcher.abort();
    Ok(())
}

fn print_run(report: &RunReport) {
    let prefix = if report.dry_run { "[dry run] " } else { "" };
    println!(
        "{prefix}{} event(s) considered, {} occurrence(s) fired, {} command(s) enqueued",
        report.events_considered, report.occurrences_fired, report.enqueued
    );
    if report.skipped_no_action > 0 || report.already_claimed > 0 || report.failures > 0 {
        println!(
            "{prefix}{} without action, {} already claimed, {} failure(s)",
            report.skipped_no_action, report.already_claimed, report.failures
        );
    }
}

fn print_reclaim(state: &str, report: &ReclaimReport) {
    println!(
        "{} {state} command(s) timed out, {} conflict(s), {} failure(s)",
        report.reclaimed.len(),
        report.conflicts,
        report.failures
    );
}
