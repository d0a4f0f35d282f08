//! # chanlog CLI
//!
//! ## Usage
//!
//! ```bash
//! chanlog --config ./config/chanlog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chanlog init` | Create the SQLite database and run schema migrations |
//! | `chanlog token add <TOKEN>` | Store the API credential |
//! | `chanlog run-once` | Run a single ingest and print the result |
//! | `chanlog watch` | Poll during every session window until interrupted |
//! | `chanlog serve` | Start the HTTP trigger server |
//! | `chanlog stats` | Show what has been collected |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use chanlog::config::{self, Config};
use chanlog::ingest::IngestService;
use chanlog::session::SystemClock;
use chanlog::store::{CredentialProvider, SqliteStore};
use chanlog::{db, logging, migrate, scheduler, server, stats};

/// chanlog: collects timestamped log lines from a chat channel into SQLite.
///
/// Settings come from the `--config` TOML file and can be overridden with
/// environment variables such as `DATABASE_PATH` or `CRON_SECRET`.
#[derive(Parser)]
#[command(
    name = "chanlog",
    about = "Collects timestamped log lines from a chat channel into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chanlog.toml`. A missing file is fine when the
    /// environment provides the settings.
    #[arg(long, global = true, default_value = "./config/chanlog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage API credentials.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Run the pipeline once and exit.
    ///
    /// Exits with status 1 when the database is unreachable, no credential
    /// is stored, or the run fails.
    RunOnce,

    /// Poll during every session window until Ctrl-C.
    Watch,

    /// Start the HTTP trigger server.
    Serve,

    /// Show record counts and session status.
    Stats,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a credential. The most recently added one is used.
    Add {
        /// The raw Authorization header value.
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Token {
            action: TokenAction::Add { token },
        } => {
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("token must not be empty");
            }
            let store = open_store(&cfg).await?;
            store.add_token(token).await?;
            println!("Token stored.");
        }
        Commands::RunOnce => {
            if let Err(e) = run_once(&cfg).await {
                eprintln!("ERROR: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Watch => {
            let store = open_store(&cfg).await?;
            let service = Arc::new(IngestService::from_config(&cfg, store)?);
            let shutdown = shutdown_token();
            println!(
                "Watching channel {} during {} (UTC{:+}), polling every {}ms. Ctrl-C to stop.",
                cfg.discord.channel_id,
                cfg.schedule.window().describe(),
                cfg.schedule.utc_offset_hours,
                cfg.schedule.polling_interval_ms
            );
            scheduler::supervise(
                service,
                cfg.schedule.window(),
                cfg.schedule.polling_interval(),
                Arc::new(SystemClock),
                shutdown,
            )
            .await;
            println!("Stopped.");
        }
        Commands::Serve => {
            let store = open_store(&cfg).await?;
            let service = Arc::new(IngestService::from_config(&cfg, store)?);
            server::run_server(&cfg, service, shutdown_token()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

/// Connect and make sure the schema exists.
async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteStore::new(pool))
}

async fn run_once(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    store
        .ping()
        .await
        .context("database connection check failed")?;
    println!("  Database:   ok ({})", cfg.db.path.display());

    if store.credential().await?.is_none() {
        anyhow::bail!("no credential stored; add one with `chanlog token add <TOKEN>`");
    }
    println!("  Credential: ok");

    let service = IngestService::from_config(cfg, store)?;
    let summary = service.run().await?;

    println!();
    println!("Run complete");
    println!("  Messages:   {}", summary.total);
    println!("  Saved:      {}", summary.saved);
    println!("  Finished:   {}", chrono::Utc::now().to_rfc3339());
    Ok(())
}

/// A token cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
