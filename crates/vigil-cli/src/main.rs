//! vigil - security-analysis pipeline for conversational AI traffic.
//!
//! One binary, one subcommand per pipeline stage. The gate runs as a
//! long-lived HTTP service; archive, aggregate and fanout are one-shot
//! jobs driven by a scheduler or trigger; extract is a batch-style
//! consumer that shuts down at its idle timeout. Every subcommand maps
//! stage errors to a non-zero exit.

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// vigil - prompt-injection analysis pipeline
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the ingestion gate HTTP endpoint
    Gate {
        /// Port to listen on; overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Drain the interactions topic into archive chunks, once
    Archive,
    /// Stage transcripts for a date and submit the judge batch job
    Aggregate {
        /// Target date as YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Fan a finalized judge result object out onto the results topic
    Fanout {
        /// Bucket of the finalized object
        #[arg(long)]
        bucket: String,
        /// Name of the finalized object
        #[arg(long)]
        name: String,
    },
    /// Consume judge results and harvest injections into the index
    Extract {
        /// Log intended upserts instead of writing
        #[arg(long)]
        dry_run: bool,
        /// Hard-fail on judge-positive events with zero extracted payloads
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Gate { port } => commands::gate::run(&config, port).await,
        Command::Archive => commands::archive::run(&config).await,
        Command::Aggregate { date } => commands::aggregate::run(&config, date.as_deref()).await,
        Command::Fanout { bucket, name } => commands::fanout::run(&config, bucket, name).await,
        Command::Extract { dry_run, strict } => {
            commands::extract::run(&config, dry_run, strict).await
        }
    }
}
