use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use orchestra::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "orchestra",
    about = "Regime-aware hierarchical orchestration engine (replay harness)",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run portfolio cycles against a scenario of replayed workers
    Run {
        /// Scenario JSON file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of portfolio runs to execute
        #[arg(short, long, default_value_t = 1)]
        cycles: u32,

        /// Entries of each history to include in the monitoring snapshot
        #[arg(long, default_value_t = 10)]
        history: usize,
    },

    /// Print the effective configuration
    Config,
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run {
            scenario,
            cycles,
            history,
        } => {
            info!("Running {} cycle(s) of scenario {}", cycles, scenario.display());
            commands::run_scenario(config, &scenario, cycles, history).await?;
        }
        Commands::Config => {
            commands::print_config(&config)?;
        }
    }
    Ok(())
}
