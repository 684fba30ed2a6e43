use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use slabflow_core::source::{DataSource, StackDir};

use crate::summary::print_source_info;

#[derive(Args)]
pub struct InfoArgs {
    /// Stack directory (containing acquisition.toml)
    pub dir: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let source = StackDir::open(&args.dir)
        .with_context(|| format!("Failed to open stack directory {}", args.dir.display()))?;
    print_source_info(&source.name(), source.params());
    println!("  Sample format: {:?}", source.sample_format());
    Ok(())
}
