mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slabflow", about = "Light-sheet volume processing pipelines")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show acquisition parameters of a stack directory
    Info(commands::info::InfoArgs),
    /// List the built-in stages and their parameters
    Stages,
    /// Run a plan file over every selected timepoint
    Run(commands::run::RunArgs),
    /// Preview a plan file without writers
    Preview(commands::preview::PreviewArgs),
    /// Print an example plan file
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Stages => commands::stages::run(),
        Commands::Run(args) => commands::run::run(args),
        Commands::Preview(args) => commands::preview::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
