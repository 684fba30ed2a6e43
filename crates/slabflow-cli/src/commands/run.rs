use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use console::Style;
use slabflow_core::compute::CpuBackend;
use slabflow_core::error::PlanError;
use slabflow_core::plan::{Plan, PlanObserver, ProcessPlan, RunConfig};
use slabflow_core::source::StackDir;
use slabflow_core::stages::builtin_registry;

use super::config::{load_plan_file, pick_range};
use crate::progress::BarObserver;
use crate::summary::print_plan_summary;

#[derive(Args)]
pub struct RunArgs {
    /// Plan file (TOML)
    pub plan: PathBuf,

    /// Timepoints to process, e.g. "0-3,5" (default: plan file, then all)
    #[arg(long)]
    pub t_range: Option<String>,

    /// Channels to process, e.g. "0,2" (default: plan file, then all)
    #[arg(long)]
    pub c_range: Option<String>,

    /// Proceed despite sanity warnings
    #[arg(long)]
    pub skip_warnings: bool,
}

/// Build an unplanned [`Plan`] from a plan file and range overrides.
pub(super) fn open_plan(
    config: &RunConfig,
    t_range: Option<&str>,
    c_range: Option<&str>,
    observer: Arc<dyn PlanObserver>,
) -> Result<Plan> {
    let source = StackDir::open(&config.source)
        .with_context(|| format!("Failed to open stack directory {}", config.source.display()))?;
    let backend = Arc::new(CpuBackend);
    let registry = builtin_registry(backend.clone());
    let specs = config.specs(&registry)?;
    let plan = Plan::new(
        Arc::new(source),
        specs,
        pick_range(t_range, config.t_range.clone())?,
        pick_range(c_range, config.c_range.clone())?,
    )?
    .with_backend(backend)
    .with_observer(observer);
    Ok(plan)
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = load_plan_file(&args.plan)?;
    let observer = Arc::new(BarObserver::new()?);
    let plan = open_plan(
        &config,
        args.t_range.as_deref(),
        args.c_range.as_deref(),
        observer.clone(),
    )?;
    print_plan_summary(&plan, "slabflow run");

    let mut plan = ProcessPlan::new(plan);
    let skip_warnings = args.skip_warnings || config.skip_warnings;
    match plan.plan(skip_warnings) {
        Ok(()) => {}
        Err(PlanError::Warning(messages)) => {
            let warn = Style::new().yellow().bold();
            for message in &messages {
                eprintln!("  {} {}", warn.apply_to("warning:"), message);
            }
            bail!("Sanity check failed; re-run with --skip-warnings to proceed");
        }
        Err(e) => return Err(e.into()),
    }
    if !plan.is_ready() {
        bail!("Plan has no active stages");
    }

    let summary = plan.execute()?;
    if summary.aborted {
        observer.bar().abandon_with_message("Aborted");
    } else {
        observer.bar().finish_with_message("Done");
    }
    println!(
        "\nProcessed {} timepoint(s) from {}",
        summary.processed_count(),
        config.source.display()
    );

    Ok(())
}
