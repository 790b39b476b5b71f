//! # Proofsync CLI (`proofsync`)
//!
//! The `proofsync` binary drives the pipeline one step per invocation. It
//! is designed to be run by an external scheduler (cron or similar): each
//! run claims at most one eligible task, advances it, and exits.
//!
//! ## Usage
//!
//! ```bash
//! proofsync --config ./config/proofsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `proofsync init` | Create the SQLite database and run schema migrations |
//! | `proofsync sync` | Claim one task and run its fetch or resync pass |
//! | `proofsync ai` | Claim one task and submit one correction batch |
//! | `proofsync tasks` | Print a per-task progress overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use proofsync::{ai_cmd, config, migrate, status, sync_cmd};

/// Proofsync — incremental text synchronization and AI correction pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/proofsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "proofsync",
    about = "Proofsync — incremental text synchronization and AI correction pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/proofsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (task,
    /// task_item, database_connection, ai_model). Idempotent.
    Init,

    /// Claim one task and advance its synchronization work.
    ///
    /// Runs the fetch engine for tasks in the new or fetch stage, or a
    /// resync pass followed by a catch-up fetch for tasks in the resync
    /// stage. Exits cleanly when no task is eligible.
    Sync,

    /// Claim one task and submit one batch of pending records for
    /// correction.
    ///
    /// Builds the prompt, calls the configured provider, and reconciles
    /// the reply. Exits cleanly when no task is eligible.
    Ai,

    /// Print a per-task overview of stages, counters, and progress.
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync => {
            sync_cmd::run(&cfg).await?;
        }
        Commands::Ai => {
            ai_cmd::run(&cfg).await?;
        }
        Commands::Tasks => {
            status::run_tasks(&cfg).await?;
        }
    }

    Ok(())
}
