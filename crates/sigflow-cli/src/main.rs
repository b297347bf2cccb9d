//! sigflow CLI - run experiments on simulated neuromorphic chips.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sigflow_config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sigflow")]
#[command(author, version, about = "sigflow graph executor CLI", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when absent
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment against simulated connections
    Run(commands::run::RunArgs),

    /// Build an experiment's graph and write it as JSON
    Graph(commands::graph::GraphArgs),

    /// Summarise a serialized graph
    Inspect(commands::inspect::InspectArgs),

    /// Print or write the effective configuration
    Config(commands::config::ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // RUST_LOG wins over the configured filter; log records are bridged
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    match cli.command {
        Commands::Run(args) => commands::run::run(args, &config),
        Commands::Graph(args) => commands::graph::run(args),
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Config(args) => commands::config::run(args, &config),
    }
}
