//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "harmony")]
#[command(about = "Workflow orchestration core for the Harmony data-transformation platform")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML); environment variables still win
    #[arg(long, short = 'c', global = true)]
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
    /// Initialize the data directory and database
    Init,

    /// Run pending database migrations
    Migrate,

    /// Start the worker-facing server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT
        #[arg(default_value = "127.0.0.1:3070")]
        bind: String,
    },

    /// Show jobs and their progress
    Status,

    /// Cancel a job and sweep its outstanding work items
    Cancel {
        job_id: String,
        /// Message recorded on the job
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Pause a live job
    Pause { job_id: String },

    /// Resume a paused job
    Resume { job_id: String },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::init::cmd_init(&settings).await,
        Commands::Migrate => commands::init::cmd_migrate(&settings).await,
        Commands::Serve { bind } => commands::serve::cmd_serve(&settings, &bind).await,
        Commands::Status => commands::status::cmd_status(&settings).await,
        Commands::Cancel { job_id, message } => {
            commands::jobs::cmd_cancel(&settings, &job_id, message.as_deref()).await
        }
        Commands::Pause { job_id } => commands::jobs::cmd_pause(&settings, &job_id).await,
        Commands::Resume { job_id } => commands::jobs::cmd_resume(&settings, &job_id).await,
    }
}
