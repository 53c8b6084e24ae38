//! # Dossier CLI (`dossier`)
//!
//! The `dossier` binary drives the research pipeline from the command line
//! and hosts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! dossier --config ./config/dossier.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dossier run "<question>"` | Run one research pipeline to completion |
//! | `dossier ingest` | Scan the watch directory into the index once |
//! | `dossier serve` | Start the HTTP API with the ingestion watcher |
//!
//! ## Examples
//!
//! ```bash
//! # One-off research run, brief printed as JSON
//! dossier run "does caffeine affect deep sleep?"
//!
//! # Verify what the watch directory would ingest
//! dossier ingest
//!
//! # Start the API
//! dossier serve --config ./config/dossier.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use dossier::config::{load_config, Config};
use dossier::embedding::Embedder;
use dossier::index::RetrievalIndex;
use dossier::ingest::IngestionPipeline;
use dossier::models::StageUpdate;
use dossier::pipeline::Pipeline;
use dossier::server::run_server;

/// Dossier — a staged research agent over a local retrieval index.
#[derive(Parser)]
#[command(
    name = "dossier",
    about = "Dossier — a staged research agent over a local retrieval index",
    version,
    long_about = "Dossier answers open questions by planning, searching, reading, verifying, \
    reflecting, and briefing over an embedding-backed index fed by a watched directory and a \
    web-scrape fallback. Runs degrade gracefully when external model APIs are unavailable."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dossier.toml`. A missing file means defaults
    /// for every section.
    #[arg(long, global = true, default_value = "./config/dossier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run one research pipeline to completion.
    ///
    /// Scans the watch directory into the index first, then runs every stage
    /// and prints the final brief as pretty JSON. Stage progress goes to
    /// stderr via logging; pass `--quiet` to suppress the stage trace.
    Run {
        /// The research question.
        query: String,

        /// Suppress the per-stage progress trace on stdout.
        #[arg(long)]
        quiet: bool,
    },

    /// Scan the watch directory into the index once and report counts.
    ///
    /// Useful for verifying what a `serve` instance would pick up.
    Ingest,

    /// Start the HTTP API.
    ///
    /// Serves `POST /research`, `GET /research/{task_id}`, `POST /oneshot`,
    /// and `GET /health`, with the ingestion watcher running alongside.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dossier=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if cli.config.is_file() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Run { query, quiet } => run_once(&config, &query, quiet).await,
        Commands::Ingest => ingest_once(&config).await,
        Commands::Serve => run_server(&config).await,
    }
}

async fn run_once(config: &Config, query: &str, quiet: bool) -> Result<()> {
    let index = Arc::new(RetrievalIndex::new(Embedder::new(&config.embedding)));

    let ingestion = IngestionPipeline::new(index.clone(), config.ingest.clone());
    let ingested = ingestion.scan_once().await?;
    if !quiet && ingested > 0 {
        println!("Ingested {} local document(s)", ingested);
    }

    let pipeline = Pipeline::from_config(config, index);

    let (tx, mut rx) = mpsc::channel::<StageUpdate>(16);
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if !quiet {
                println!("[{}]", update.stage_name());
            }
        }
    });

    let brief = pipeline.run_streaming(query, tx).await?;
    let _ = printer.await;

    println!("{}", serde_json::to_string_pretty(&brief)?);
    Ok(())
}

async fn ingest_once(config: &Config) -> Result<()> {
    let index = Arc::new(RetrievalIndex::new(Embedder::new(&config.embedding)));
    let ingestion = IngestionPipeline::new(index.clone(), config.ingest.clone());
    let count = ingestion.scan_once().await?;
    println!(
        "Ingested {} document(s) from {} ({} total in index)",
        count,
        config.ingest.watch_dir.display(),
        index.len()
    );
    Ok(())
}
