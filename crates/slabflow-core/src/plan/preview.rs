use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use ndarray::ArrayD;
use tracing::{debug, info};

use crate::error::{PlanError, Result};
use crate::meta::Meta;

use super::{Plan, PlanObserver, PlanState};

/// Interactive variant of a plan: writers are removed and execution yields
/// each processed timepoint.
#[derive(Debug)]
pub struct PreviewPlan {
    plan: Plan,
}

impl PreviewPlan {
    /// Drop every writer spec (active or not) and disable sanity warnings.
    /// Any previous instantiation is discarded.
    pub fn new(mut plan: Plan) -> Self {
        let before = plan.specs.len();
        plan.specs.retain(|spec| !spec.is_writer());
        debug!(removed = before - plan.specs.len(), "Writers removed for preview");
        plan.sanity_checks = false;
        plan.stages.clear();
        plan.meta = None;
        plan.state = PlanState::Unvalidated;
        Self { plan }
    }

    /// Always succeeds: a preview never persists anything.
    pub fn check_sanity(&self) -> Result<()> {
        Ok(())
    }

    /// A fresh lazy iterator over the selected timepoints.
    pub fn execute(&mut self) -> Result<PreviewRun<'_>> {
        if !self.plan.is_ready() || self.plan.state == PlanState::Executing {
            return Err(PlanError::NotReady);
        }
        let remaining = self.plan.t_range.clone().into_iter();
        let observer = Arc::clone(&self.plan.observer);
        observer.run_started(remaining.len());
        info!(
            source = %self.plan.source.name(),
            timepoints = remaining.len(),
            "Starting preview"
        );
        self.plan.state = PlanState::Executing;
        Ok(PreviewRun {
            plan: &mut self.plan,
            observer,
            remaining,
            finished: false,
        })
    }
}

impl Deref for PreviewPlan {
    type Target = Plan;

    fn deref(&self) -> &Plan {
        &self.plan
    }
}

impl DerefMut for PreviewPlan {
    fn deref_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }
}

/// Iterator returned by [`PreviewPlan::execute`]. Each pull processes one
/// timepoint; the iterator ends after the last timepoint, the first error,
/// or an observed abort request. A timepoint interrupted by an abort between
/// stages is not yielded.
pub struct PreviewRun<'a> {
    plan: &'a mut Plan,
    observer: Arc<dyn PlanObserver>,
    remaining: std::vec::IntoIter<usize>,
    finished: bool,
}

impl PreviewRun<'_> {
    fn finish(&mut self, state: PlanState) {
        self.finished = true;
        self.plan.state = state;
        debug!(%state, "Preview finished");
    }
}

impl Iterator for PreviewRun<'_> {
    type Item = Result<(ArrayD<f32>, Meta)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(t) = self.remaining.next() else {
            self.finish(PlanState::Completed);
            return None;
        };
        if self.plan.abort.is_aborted() {
            info!(t, "Preview aborted");
            self.finish(PlanState::Aborted);
            return None;
        }

        self.observer.timepoint_started(t);
        match self.plan.run_timepoint(t, true) {
            Ok(Some(data)) => {
                self.observer.timepoint_finished(t);
                match self.plan.meta.clone() {
                    Some(meta) => Some(Ok((data, meta))),
                    None => {
                        self.finish(PlanState::Failed);
                        Some(Err(PlanError::NotReady))
                    }
                }
            }
            Ok(None) => {
                self.finish(PlanState::Aborted);
                None
            }
            Err(e) => {
                self.finish(PlanState::Failed);
                Some(Err(e))
            }
        }
    }
}

impl Drop for PreviewRun<'_> {
    fn drop(&mut self) {
        // Dropped early by the consumer.
        if !self.finished {
            self.plan.state = PlanState::Aborted;
        }
    }
}
