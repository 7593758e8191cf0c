//! CLI parser and dispatch.

mod context;
mod queue;
mod seed;
mod status;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use graphwarden::config::Config;
use graphwarden::models::{Priority, WorkerType};

use context::AppContext;

#[derive(Parser)]
#[command(name = "graphwarden")]
#[command(about = "Social graph crawl and moderation workers")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker until interrupted
    Worker {
        #[arg(value_enum)]
        worker_type: WorkerType,
    },

    /// Manage the priority queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Register crawl starting points
    Seed {
        #[command(subcommand)]
        command: SeedCommands,
    },

    /// Show live worker heartbeats
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Queue a user for classification
    Add {
        user_id: u64,
        #[arg(short, long, value_enum, default_value = "normal")]
        priority: Priority,
        /// Skip the user if its record was updated recently
        #[arg(long)]
        check_exists: bool,
    },
    /// Ask consumers to drop a queued user
    Abort { user_id: u64 },
    /// Show the status of a queued user
    Info { user_id: u64 },
    /// Show lane depths
    Depth,
}

#[derive(Subcommand)]
enum SeedCommands {
    /// Users whose friend lists should be crawled
    User {
        #[arg(required = true)]
        user_ids: Vec<u64>,
    },
    /// Groups whose rosters should be crawled
    Group {
        #[arg(required = true)]
        group_ids: Vec<u64>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };
    config.validate()?;
    if let Some(path) = &config.source_path {
        tracing::info!("Loaded config from {}", path.display());
    }

    let ctx = AppContext::open(config).await?;

    match cli.command {
        Commands::Worker { worker_type } => worker::cmd_worker(&ctx, worker_type).await,
        Commands::Queue { command } => match command {
            QueueCommands::Add {
                user_id,
                priority,
                check_exists,
            } => queue::cmd_queue_add(&ctx, user_id, priority, check_exists).await,
            QueueCommands::Abort { user_id } => queue::cmd_queue_abort(&ctx, user_id).await,
            QueueCommands::Info { user_id } => queue::cmd_queue_info(&ctx, user_id).await,
            QueueCommands::Depth => queue::cmd_queue_depth(&ctx).await,
        },
        Commands::Seed { command } => match command {
            SeedCommands::User { user_ids } => seed::cmd_seed_user(&ctx, &user_ids).await,
            SeedCommands::Group { group_ids } => seed::cmd_seed_group(&ctx, &group_ids).await,
        },
        Commands::Status { json } => status::cmd_status(&ctx, json).await,
    }
}
