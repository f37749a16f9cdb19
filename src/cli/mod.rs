// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;
pub mod simulate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ampsizer",
    about = "LLM-in-the-loop analog circuit sizing",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Suppress progress output (only emit the final circuit)
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Size a circuit until its targets are met or the run stops
    Run(RunArgs),
    /// Simulate a circuit once and print the extracted metrics
    Simulate {
        /// SPICE netlist to simulate
        #[arg(long)]
        netlist: PathBuf,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// SPICE netlist to start from
    #[arg(long)]
    pub netlist: PathBuf,

    /// Performance target, e.g. "ac_gain_db>=60dB" (repeatable; replaces config targets)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Max iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Iterations without progress before the run is declared stalled
    #[arg(long)]
    pub patience: Option<u32>,

    /// Root directory for run artifacts
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,

    /// Drive the run from a scripted-reply JSON file instead of a live model
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Model name passed to the provider
    #[arg(short, long)]
    pub model: Option<String>,

    /// Rewrite this netlist file with every accepted candidate (backups kept alongside)
    #[arg(long)]
    pub apply_path: Option<PathBuf>,
}
