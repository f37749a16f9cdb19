// src/main.rs — ampsizer entry point

use clap::Parser;

use ampsizer::cli::{Cli, Commands};
use ampsizer::infra::config::Config;
use ampsizer::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        Commands::Run(ref args) => ampsizer::cli::run::run_sizing(args, &config, cli.quiet).await,
        Commands::Simulate { ref netlist } => {
            ampsizer::cli::simulate::run_simulate(netlist, &config).await
        }
    }
}
