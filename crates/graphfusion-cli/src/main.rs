//! GraphFusion CLI - 命令行工具

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod plan;

#[derive(Parser)]
#[command(name = "graphfusion")]
#[command(about = "GraphFusion - multi-agent task orchestration with neural memory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task plan with its agents
    Run {
        /// Plan file (JSON or YAML) with `agents` and `tasks`
        #[arg(short, long)]
        plan: PathBuf,
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
        /// Maximum tasks executed in parallel per batch
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// List model context windows
    Models {
        /// Show a single model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List the default team roles
    Roles,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Configuration file path
        #[arg(short, long)]
        path: Option<String>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Check a configuration file
    Validate {
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphfusion=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            config,
            max_parallel,
        } => {
            commands::run::run(&plan, config.as_deref(), max_parallel).await?;
        }
        Commands::Models { model } => {
            commands::models::run(model.as_deref());
        }
        Commands::Roles => {
            commands::roles::run();
        }
        Commands::Config { command } => {
            commands::config::run(command).await?;
        }
    }

    Ok(())
}
