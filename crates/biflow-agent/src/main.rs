//! biflow - Bidirectional Flow Forwarder
//!
//! # Usage
//!
//! ```bash
//! biflow run -c /etc/biflow/biflow.toml
//! biflow run --flows 100 --rounds 5 --exit-when-done
//! biflow check -c biflow.toml
//! biflow default-config > biflow.toml
//! ```

use anyhow::{Context, Result};
use biflow_agent::config::OutputFormat;
use biflow_agent::{Agent, AgentConfig, TrafficPlan};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "biflow")]
#[command(version)]
#[command(about = "Stateful two-port flow forwarder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the forwarder and report until interrupted
    Run {
        /// Configuration file
        #[arg(short, long, env = "BIFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Replay this many synthetic flows after attaching
        #[arg(long)]
        flows: Option<usize>,

        /// Rounds of synthetic traffic
        #[arg(long, default_value_t = 1, requires = "flows")]
        rounds: usize,

        /// Seed for reproducible synthetic traffic
        #[arg(long, requires = "flows")]
        seed: Option<u64>,

        /// Exit once the replay has been processed
        #[arg(long, requires = "flows")]
        exit_when_done: bool,

        /// Override the report format
        #[arg(long, short)]
        format: Option<OutputFormat>,
    },
    /// Validate a configuration file
    Check {
        /// Configuration file
        #[arg(short, long, env = "BIFLOW_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the default configuration
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            flows,
            rounds,
            seed,
            exit_when_done,
            format,
        } => {
            tracing::info!("biflow v{}", env!("CARGO_PKG_VERSION"));

            let mut config = load_config(config.as_deref())?;
            if let Some(format) = format {
                config.control.format = format;
            }
            let traffic = flows.map(|flows| TrafficPlan { flows, rounds, seed });

            Agent::new(config)?.run(traffic, exit_when_done).await
        }
        Commands::Check { config } => {
            let config = load_config(config.as_deref())?;
            let ports = config.port_pair()?;
            println!(
                "configuration ok: inside {} outside {}, {} flows, {} workers",
                ports.inside(),
                ports.outside(),
                config.flow_table.capacity,
                config.engine.workers
            );
            Ok(())
        }
        Commands::DefaultConfig => {
            print!("{}", AgentConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    match path {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            tracing::info!("no config file given, using defaults");
            Ok(AgentConfig::default())
        }
    }
}
