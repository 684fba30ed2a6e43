use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, bail, Result};
use clap::Args;
use console::Style;
use ndarray::ArrayD;
use slabflow_core::error::PlanError;
use slabflow_core::meta::Meta;
use slabflow_core::plan::PreviewPlan;

use super::config::load_plan_file;
use super::run::open_plan;
use crate::progress::BarObserver;
use crate::summary::print_plan_summary;

#[derive(Args)]
pub struct PreviewArgs {
    /// Plan file (TOML)
    pub plan: PathBuf,

    /// Stop after this many timepoints
    #[arg(long, default_value = "1")]
    pub limit: usize,

    /// Timepoints to preview, e.g. "0-3,5"
    #[arg(long)]
    pub t_range: Option<String>,

    /// Channels to preview, e.g. "0,2"
    #[arg(long)]
    pub c_range: Option<String>,
}

type PreviewItem = std::result::Result<(ArrayD<f32>, Meta), PlanError>;

pub fn run(args: &PreviewArgs) -> Result<()> {
    if args.limit == 0 {
        bail!("--limit must be at least 1");
    }
    let config = load_plan_file(&args.plan)?;
    let observer = Arc::new(BarObserver::new()?);
    let plan = open_plan(
        &config,
        args.t_range.as_deref(),
        args.c_range.as_deref(),
        observer.clone(),
    )?;

    let mut preview = PreviewPlan::new(plan);
    print_plan_summary(&preview, "slabflow preview");
    preview.plan(true)?;
    if !preview.is_ready() {
        bail!("Nothing to preview: the plan has no active non-writer stages");
    }
    let abort = preview.abort_handle();

    let (tx, rx) = mpsc::channel::<PreviewItem>();
    let worker = thread::spawn(move || {
        let run = match preview.execute() {
            Ok(run) => run,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
        for item in run {
            if tx.send(item).is_err() {
                break;
            }
        }
    });

    let label = Style::new().dim();
    let value = Style::new().bold().white();
    let mut received = 0;
    let mut failure = None;
    for item in rx.iter() {
        match item {
            Ok((data, meta)) => {
                received += 1;
                observer.bar().suspend(|| {
                    println!(
                        "  {} {}  {} {:?}  {} {}  {}",
                        label.apply_to("t"),
                        value.apply_to(meta.t.unwrap_or_default()),
                        label.apply_to("shape"),
                        data.shape(),
                        label.apply_to("axes"),
                        value.apply_to(meta.axes.as_ref().map(|a| a.to_string()).unwrap_or_default()),
                        format_stats(&data),
                    );
                });
                if received >= args.limit {
                    abort.abort();
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(rx);
    worker
        .join()
        .map_err(|_| anyhow!("Preview worker panicked"))?;
    observer.bar().finish_and_clear();

    if let Some(e) = failure {
        return Err(e.into());
    }
    println!("\nPreviewed {received} timepoint(s)");
    Ok(())
}

fn format_stats(data: &ArrayD<f32>) -> String {
    if data.is_empty() {
        return "empty".to_string();
    }
    let min = data.iter().copied().fold(f32::INFINITY, f32::min);
    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64;
    format!("min {min:.1}  max {max:.1}  mean {mean:.2}")
}
