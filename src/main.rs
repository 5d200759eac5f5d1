use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rlm_act::autonomy::AutonomyMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "rlm-act")]
#[command(version, about = "Autonomous multi-phase development pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the six-phase pipeline from the start
    Run {
        /// Autonomy mode: checkpoint, batch, fully-autonomous
        #[arg(long)]
        mode: Option<AutonomyMode>,

        /// Path to the task file (defaults to TASK.md at the project root)
        #[arg(long)]
        task: Option<PathBuf>,

        /// Continue at every pause point without asking
        #[arg(long)]
        yes: bool,
    },
    /// Resume from the most recent checkpoint
    Resume {
        /// Path to the task file (defaults to TASK.md at the project root)
        #[arg(long)]
        task: Option<PathBuf>,

        /// Continue at every pause point without asking
        #[arg(long)]
        yes: bool,
    },
    /// Show the latest checkpoint and pipeline progress
    Status,
    /// Manage checkpoint retention
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Check stored agent credentials
    AgentCheck,
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List all checkpoints
    List,
    /// Delete checkpoints older than the given number of days
    Clean {
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// Delete every checkpoint
    CleanAll {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Run { mode, task, yes } => {
            cmd::cmd_run(project_dir, cli.verbose, mode, task, yes).await?;
        }
        Commands::Resume { task, yes } => {
            cmd::cmd_resume(project_dir, cli.verbose, task, yes).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Checkpoints { command } => match command {
            CheckpointCommands::List => cmd::cmd_checkpoints_list(&project_dir)?,
            CheckpointCommands::Clean { days } => cmd::cmd_checkpoints_clean(&project_dir, days)?,
            CheckpointCommands::CleanAll { force } => {
                cmd::cmd_checkpoints_clean_all(&project_dir, force)?
            }
        },
        Commands::AgentCheck => cmd::cmd_agent_check()?,
    }

    Ok(())
}
