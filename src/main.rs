//! # docsync CLI
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync init` | Create the data directories and the index schema |
//! | `docsync serve` | Startup reconciliation, live watcher, HTTP API |
//! | `docsync sync` | One reconciliation pass |
//! | `docsync search "<query>"` | Similarity search |
//! | `docsync status` | Known files, last processed time, index size |
//! | `docsync forget <path>` | Drop a document from the index and ledger |
//!
//! Errors are classified once, here: fatal errors (corrupt ledger, index
//! unavailable, bad configuration, watcher failure) exit with status 2,
//! everything else with status 1.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use docsync::config::{self, Config};
use docsync::engine::SyncEngine;
use docsync::error::{SyncError, SyncResult};
use docsync::logging::init_logging;
use docsync::progress::ProgressMode;
use docsync::reconcile::ReconcileReport;
use docsync::server;

const DEFAULT_CONFIG: &str = "./config/docsync.toml";

/// docsync keeps a vector index in step with a folder of documents.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "docsync - incremental document sync into a vector index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docsync.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    /// Log filter, e.g. `debug` or `docsync=trace`. Overrides `[logging].level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and the index schema. Idempotent.
    Init,

    /// Reconcile, then watch the documents directory and serve the HTTP API.
    ///
    /// The watcher starts only after the startup reconciliation has
    /// finished. Ctrl-C shuts everything down.
    Serve,

    /// Run one reconciliation pass and print what changed.
    Sync,

    /// Search indexed documents.
    Search {
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show ledger and index statistics.
    Status,

    /// Remove a document from the index and the ledger. The file on disk
    /// is left in place.
    Forget {
        /// Absolute path, or path relative to the documents directory.
        path: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = start(cli).await {
        report_and_exit(err);
    }
}

async fn start(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = resolve_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        cfg.logging.level = level.clone();
    }
    init_logging(&cfg.logging)?;

    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    run(cli.command, cfg, progress).await
}

fn report_and_exit(err: anyhow::Error) -> ! {
    match err.downcast_ref::<SyncError>() {
        Some(sync_err) if sync_err.is_fatal() => {
            error!(error = %sync_err, "fatal error, shutting down");
            eprintln!("fatal: {:#}", err);
            std::process::exit(2);
        }
        _ => {
            eprintln!("error: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn resolve_config(explicit: Option<&Path>) -> SyncResult<Config> {
    match explicit {
        Some(path) => config::load_config(path),
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if path.exists() {
                config::load_config(path)
            } else {
                let cfg = Config::default();
                config::validate(&cfg)?;
                Ok(cfg)
            }
        }
    }
}

async fn run(command: Commands, cfg: Config, progress: ProgressMode) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            let engine = SyncEngine::open(cfg).await?;
            println!(
                "Initialized docsync in {}",
                engine.documents_root().display()
            );
        }
        Commands::Serve => {
            let engine = Arc::new(SyncEngine::open_with_progress(cfg, progress.reporter()).await?);
            let report = engine.startup().await?;
            print_report("startup", &report);
            engine.start_watcher().await?;

            server::run_server(engine.clone(), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;

            engine.stop_watcher().await;
        }
        Commands::Sync => {
            let engine = SyncEngine::open_with_progress(cfg, progress.reporter()).await?;
            let report = engine.startup().await?;
            print_report("sync", &report);
        }
        Commands::Search { query, limit } => {
            let engine = SyncEngine::open(cfg).await?;
            let hits = engine.search(&query, limit.max(1)).await?;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} (chunk {}/{})",
                    i + 1,
                    hit.score,
                    hit.metadata.source,
                    hit.metadata.chunk_index + 1,
                    hit.metadata.total_chunks
                );
                println!("    excerpt: \"{}\"", excerpt(&hit.content, 200));
                println!();
            }
        }
        Commands::Status => {
            let engine = SyncEngine::open(cfg).await?;
            let stats = engine.index_stats().await?;
            println!("documents dir: {}", engine.documents_root().display());
            println!("  known files: {}", engine.get_known_file_count().await);
            println!(
                "  last processed: {}",
                engine
                    .get_last_processed_time()
                    .await
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("  indexed chunks: {}", stats.chunks);
            println!("  indexed sources: {}", stats.sources);
        }
        Commands::Forget { path } => {
            let engine = SyncEngine::open(cfg).await?;
            // Mutations are only accepted after a reconciliation pass.
            engine.startup().await?;
            engine.remove_and_persist(&path).await?;
            println!("forgot {}", path);
        }
    }
    Ok(())
}

fn print_report(label: &str, report: &ReconcileReport) {
    println!("{}", label);
    println!("  deleted: {}", report.deleted.len());
    println!("  processed: {}", report.processed.len());
    println!("  skipped (no text): {}", report.skipped.len());
    println!("  unchanged: {}", report.unchanged);
    if !report.failed.is_empty() {
        println!("  failed: {}", report.failed.len());
        for failed in &report.failed {
            println!("    {}: {}", failed.path, failed.error);
        }
    }
    println!("ok");
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
