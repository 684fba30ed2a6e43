use std::ops::{Deref, DerefMut};

use tracing::{info, warn};

use crate::error::{PlanError, Result};

use super::{Plan, PlanState, RunSummary};

/// Blocking execution of a plan over every selected timepoint.
///
/// Results are discarded; writers are expected to persist them. After a run
/// the plan has to be planned again before it can execute a second time.
#[derive(Debug)]
pub struct ProcessPlan {
    plan: Plan,
}

impl ProcessPlan {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }

    pub fn into_inner(self) -> Plan {
        self.plan
    }

    /// Run every timepoint in order, stopping at the first error or at an
    /// abort request observed between timepoints.
    pub fn execute(&mut self) -> Result<RunSummary> {
        if !self.plan.is_ready() || self.plan.state != PlanState::Ready {
            return Err(PlanError::NotReady);
        }
        let t_range = self.plan.t_range.clone();
        let observer = std::sync::Arc::clone(&self.plan.observer);

        self.plan.state = PlanState::Executing;
        info!(
            source = %self.plan.source.name(),
            timepoints = t_range.len(),
            stages = self.plan.stages.len(),
            "Starting run"
        );
        observer.run_started(t_range.len());

        let mut summary = RunSummary::default();
        for t in t_range {
            if self.plan.abort.is_aborted() {
                warn!(t, processed = summary.processed.len(), "Run aborted");
                summary.aborted = true;
                break;
            }
            observer.timepoint_started(t);
            if let Err(e) = self.plan.run_timepoint(t, false) {
                self.plan.state = PlanState::Failed;
                return Err(e);
            }
            info!(t, "Timepoint processed");
            summary.processed.push(t);
            observer.timepoint_finished(t);
        }

        self.plan.state = if summary.aborted {
            PlanState::Aborted
        } else {
            PlanState::Completed
        };
        info!(
            processed = summary.processed.len(),
            state = %self.plan.state,
            "Run finished"
        );
        Ok(summary)
    }
}

impl Deref for ProcessPlan {
    type Target = Plan;

    fn deref(&self) -> &Plan {
        &self.plan
    }
}

impl DerefMut for ProcessPlan {
    fn deref_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }
}
