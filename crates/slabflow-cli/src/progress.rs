use indicatif::{ProgressBar, ProgressStyle};
use slabflow_core::plan::PlanObserver;

/// Plan observer that drives a terminal progress bar (one tick per timepoint).
pub struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    pub fn new() -> anyhow::Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:24} [{bar:40}] {pos}/{len} timepoints")?
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl PlanObserver for BarObserver {
    fn run_started(&self, timepoints: usize) {
        self.bar.set_length(timepoints as u64);
        self.bar.set_position(0);
    }

    fn timepoint_started(&self, t: usize) {
        self.bar.set_message(format!("t={t}"));
    }

    fn stage_starting(&self, t: usize, _index: usize, _name: &str, verb: &str) {
        self.bar.set_message(format!("t={t} {verb}"));
    }

    fn timepoint_finished(&self, _t: usize) {
        self.bar.inc(1);
    }
}
