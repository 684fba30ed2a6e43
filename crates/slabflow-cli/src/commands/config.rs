use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use slabflow_core::plan::{RunConfig, StageEntry};
use slabflow_core::stage::{ParamValue, Params};
use tracing::debug;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the plan file to a path instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save an example plan file as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let mut decon = Params::new();
    decon.insert("otf_dir".into(), ParamValue::from("otfs"));
    decon.insert("iterations".into(), ParamValue::from(10i64));

    let config = RunConfig {
        source: PathBuf::from("cell1"),
        t_range: None,
        c_range: None,
        skip_warnings: false,
        stages: vec![
            entry("background", Params::new()),
            entry("deconvolution", decon),
            entry("tiff_writer", Params::new()),
        ],
    };
    let toml_str = toml::to_string_pretty(&config).context("Failed to serialize plan file")?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write plan file to {}", path.display()))?;
        println!("Example plan saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}

fn entry(stage_type: &str, params: Params) -> StageEntry {
    StageEntry {
        stage_type: stage_type.to_string(),
        params,
        active: true,
        collapsed: false,
    }
}

/// Read a plan file. A relative `source` is resolved against the file's directory.
pub fn load_plan_file(path: &Path) -> Result<RunConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let mut config = RunConfig::from_toml(&contents)
        .with_context(|| format!("Invalid plan file {}", path.display()))?;
    if config.source.is_relative() {
        if let Some(parent) = path.parent() {
            config.source = parent.join(&config.source);
        }
    }
    debug!(
        plan = %path.display(),
        source = %config.source.display(),
        stages = config.stages.len(),
        "Loaded plan file"
    );
    Ok(config)
}

/// Upper bound on the number of indices a range list may expand to.
const MAX_RANGE_INDICES: usize = 1 << 20;

/// Parse an index list such as `"0-3,5"` (ranges are inclusive).
pub fn parse_range(text: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid range start in '{part}'"))?;
                let end: usize = end
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid range end in '{part}'"))?;
                if end < start {
                    bail!("Range '{part}' is reversed");
                }
                if end - start >= MAX_RANGE_INDICES - indices.len() {
                    bail!("Range '{part}' has more than {MAX_RANGE_INDICES} indices");
                }
                indices.extend(start..=end);
            }
            None => {
                if indices.len() >= MAX_RANGE_INDICES {
                    bail!("Index list '{text}' has more than {MAX_RANGE_INDICES} indices");
                }
                indices.push(
                    part.parse()
                        .with_context(|| format!("Invalid index '{part}'"))?,
                )
            }
        }
    }
    if indices.is_empty() {
        bail!("Empty index list '{text}'");
    }
    Ok(indices)
}

/// Command-line range if given, otherwise the plan file's.
pub fn pick_range(flag: Option<&str>, from_file: Option<Vec<usize>>) -> Result<Option<Vec<usize>>> {
    match flag {
        Some(text) => parse_range(text).map(Some),
        None => Ok(from_file),
    }
}
