use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanState {
    /// Constructed, stages not yet instantiated.
    Unvalidated,
    Ready,
    Executing,
    Completed,
    Aborted,
    Failed,
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unvalidated => write!(f, "Unvalidated"),
            Self::Ready => write!(f, "Ready"),
            Self::Executing => write!(f, "Executing"),
            Self::Completed => write!(f, "Completed"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Shared cancellation flag. Clones observe the same flag, so a handle can
/// be moved to another thread and used while the plan executes.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Honored at the next timepoint boundary (and,
    /// in preview mode, before the next stage).
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the plan can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Thread-safe execution observer.
///
/// Implementors can use this to drive progress bars or logging. All methods
/// have default no-op implementations.
pub trait PlanObserver: Send + Sync {
    /// Execution started over `timepoints` timepoints.
    fn run_started(&self, _timepoints: usize) {}

    fn timepoint_started(&self, _t: usize) {}

    /// Preview mode only: stage `index` is about to process timepoint `t`.
    fn stage_starting(&self, _t: usize, _index: usize, _name: &str, _verb: &str) {}

    /// Timepoint `t` went through the whole chain.
    fn timepoint_finished(&self, _t: usize) {}
}

/// Observer used when none is supplied.
pub(super) struct NoOpObserver;
impl PlanObserver for NoOpObserver {}

/// Outcome of a blocking run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Timepoints that completed, in order.
    pub processed: Vec<usize>,
    /// True when the run stopped on an abort request.
    pub aborted: bool,
}

impl RunSummary {
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}
