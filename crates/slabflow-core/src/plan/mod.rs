//! Plans: validated stage lists bound to a data source, and their execution.
//!
//! A [`Plan`] is built from a data source and an ordered list of
//! [`StageSpec`]s. [`Plan::plan`] instantiates the active stages and
//! populates the [`Meta`] skeleton. Execution is done by the two wrappers:
//! [`ProcessPlan`] runs every timepoint to completion, [`PreviewPlan`] drops
//! writers and yields each processed timepoint from an iterator.

pub mod config;
mod preview;
mod process;
mod types;

use std::sync::Arc;

use ndarray::ArrayD;
use tracing::{debug, error, info, warn};

use crate::compute::{ContextRequest, CpuBackend, DeconBackend, DeviceScope};
use crate::error::{PlanError, Result, StageFailure};
use crate::meta::Meta;
use crate::otf;
use crate::source::DataSource;
use crate::stage::{undeclared_keys, DeconSettings, Stage, StageKind, StageSpec};

pub use config::{RunConfig, StageEntry};
pub use preview::{PreviewPlan, PreviewRun};
pub use process::ProcessPlan;
pub use types::{AbortHandle, PlanObserver, PlanState, RunSummary};

use types::NoOpObserver;

pub const NO_WRITER_WARNING: &str = "No image writer/output detected.";
pub const AFTER_WRITER_WARNING: &str = "You have image processors after the last writer.";

/// A stage list bound to a data source.
pub struct Plan {
    source: Arc<dyn DataSource>,
    specs: Vec<StageSpec>,
    t_range: Vec<usize>,
    c_range: Vec<usize>,
    abort: AbortHandle,
    meta: Option<Meta>,
    stages: Vec<Box<dyn Stage>>,
    backend: Arc<dyn DeconBackend>,
    observer: Arc<dyn PlanObserver>,
    state: PlanState,
    sanity_checks: bool,
}

impl Plan {
    /// Validate construction input. Never loads data.
    ///
    /// `None` (or an empty list) for either range selects everything the
    /// source reports.
    pub fn new(
        source: Arc<dyn DataSource>,
        specs: Vec<StageSpec>,
        t_range: Option<Vec<usize>>,
        c_range: Option<Vec<usize>>,
    ) -> Result<Self> {
        let nt = source.timepoint_count();
        let nc = source.channel_count();
        if nc == 0 || nt == 0 {
            return Err(PlanError::InvalidArgument(format!(
                "data source {} reports {nc} channel(s) and {nt} timepoint(s)",
                source.name()
            )));
        }
        let wavelengths = source.params().wavelengths.len();
        if wavelengths < nc {
            return Err(PlanError::InvalidArgument(format!(
                "data source {} lists {wavelengths} wavelength(s) for {nc} channel(s)",
                source.name()
            )));
        }

        for spec in &specs {
            let unknown = undeclared_keys(&spec.params, spec.stage_type.parameters());
            if !unknown.is_empty() {
                return Err(PlanError::InvalidArgument(format!(
                    "stage '{}' does not accept parameter(s): {}",
                    spec.name(),
                    unknown.join(", ")
                )));
            }
        }

        let t_range = resolve_range(t_range, nt, "timepoint")?;
        let c_range = resolve_range(c_range, nc, "channel")?;

        Ok(Self {
            source,
            specs,
            t_range,
            c_range,
            abort: AbortHandle::new(),
            meta: None,
            stages: Vec::new(),
            backend: Arc::new(CpuBackend),
            observer: Arc::new(NoOpObserver),
            state: PlanState::Unvalidated,
            sanity_checks: true,
        })
    }

    /// Backend used for deconvolution contexts (default: [`CpuBackend`]).
    pub fn with_backend(mut self, backend: Arc<dyn DeconBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlanObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Share an existing cancellation flag instead of a fresh one.
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Check the active specs for a writer, and for stages after the last one.
    pub fn check_sanity(&self) -> Result<()> {
        if !self.sanity_checks {
            return Ok(());
        }
        let active: Vec<&StageSpec> = self.specs.iter().filter(|s| s.active).collect();
        let mut warnings = Vec::new();
        match active.iter().rposition(|s| s.is_writer()) {
            None => warnings.push(NO_WRITER_WARNING.to_string()),
            Some(last) if last + 1 < active.len() => {
                warnings.push(AFTER_WRITER_WARNING.to_string())
            }
            Some(_) => {}
        }
        if warnings.is_empty() {
            Ok(())
        } else {
            Err(PlanError::Warning(warnings))
        }
    }

    /// Instantiate every active stage and populate `meta`.
    ///
    /// Construction failures are collected across all stages; if any stage
    /// fails, no stage is kept.
    pub fn plan(&mut self, skip_warnings: bool) -> Result<()> {
        if !skip_warnings {
            self.check_sanity()?;
        }
        self.stages.clear();
        self.meta = None;
        self.state = PlanState::Unvalidated;

        let mut stages = Vec::new();
        let mut failures = Vec::new();
        for spec in self.specs.iter().filter(|s| s.active) {
            match spec
                .stage_type
                .from_data_source(self.source.as_ref(), &spec.params)
            {
                Ok(stage) => stages.push(stage),
                Err(e) => {
                    error!(stage = spec.name(), error = %e, "Stage construction failed");
                    failures.push(StageFailure {
                        stage: spec.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if !failures.is_empty() {
            return Err(PlanError::Instantiation {
                source_name: self.source.name(),
                failures,
            });
        }

        self.stages = stages;
        self.meta = Some(Meta::new(
            self.source.as_ref(),
            &self.t_range,
            &self.c_range,
        ));
        if !self.stages.is_empty() {
            self.state = PlanState::Ready;
        }
        debug!(
            source = %self.source.name(),
            stages = self.stages.len(),
            timepoints = self.t_range.len(),
            channels = ?self.c_range,
            "Plan instantiated"
        );
        Ok(())
    }

    /// True once `plan()` succeeded with at least one stage.
    pub fn is_ready(&self) -> bool {
        self.meta.is_some() && !self.stages.is_empty()
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    /// Names of the instantiated stages, in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn t_range(&self) -> &[usize] {
        &self.t_range
    }

    pub fn c_range(&self) -> &[usize] {
        &self.c_range
    }

    pub fn backend(&self) -> &Arc<dyn DeconBackend> {
        &self.backend
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        warn!(source = %self.source.name(), "Abort requested");
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Whether timepoints of this plan get a scoped deconvolution context.
    pub fn uses_device_scope(&self) -> bool {
        self.c_range.len() == 1
            && self
                .stages
                .iter()
                .any(|s| s.kind() == StageKind::Deconvolution)
    }

    /// Process one timepoint. `None` means an abort was observed between
    /// stages (preview mode only) and the partial result was discarded.
    fn run_timepoint(&mut self, t: usize, preview: bool) -> Result<Option<ArrayD<f32>>> {
        let scoped = self.uses_device_scope();
        let backend = Arc::clone(&self.backend);
        let observer = Arc::clone(&self.observer);
        let abort = self.abort.clone();
        let slab = self.source.load_slab(t, &self.c_range)?;

        let Self { meta, stages, .. } = self;
        let meta = meta.as_mut().ok_or(PlanError::NotReady)?;
        meta.t = Some(t);
        meta.axes = Some(slab.axes);
        meta.has_background = true;
        let raw = slab.data;
        debug!(t, shape = ?raw.shape(), "Loaded slab");

        let outcome = setup_all(stages, &raw, meta).and_then(|()| {
            let mut scope = if scoped {
                open_scope(stages, backend.as_ref(), raw.shape(), meta)?
            } else {
                DeviceScope::empty()
            };
            run_chain(
                stages,
                raw.clone(),
                meta,
                &mut scope,
                preview,
                t,
                &abort,
                observer.as_ref(),
            )
        });

        let teardown = teardown_all(stages, &raw, meta);
        match (outcome, teardown) {
            (Ok(data), Ok(())) => Ok(data),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(secondary)) => {
                warn!(error = %secondary, "Teardown failed after an earlier error");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("source", &self.source.name())
            .field("specs", &self.specs)
            .field("t_range", &self.t_range)
            .field("c_range", &self.c_range)
            .field("stages", &self.stage_names())
            .field("state", &self.state)
            .finish()
    }
}

fn resolve_range(range: Option<Vec<usize>>, total: usize, what: &str) -> Result<Vec<usize>> {
    match range {
        Some(indices) if !indices.is_empty() => {
            if let Some(bad) = indices.iter().find(|&&i| i >= total) {
                return Err(PlanError::InvalidArgument(format!(
                    "{what} index {bad} out of range (total: {total})"
                )));
            }
            Ok(indices)
        }
        _ => Ok((0..total).collect()),
    }
}

fn setup_all(stages: &mut [Box<dyn Stage>], data: &ArrayD<f32>, meta: &Meta) -> Result<()> {
    for (index, stage) in stages.iter_mut().enumerate() {
        stage
            .setup_t(data, meta)
            .map_err(|source| PlanError::Setup {
                stage: stage.name().to_string(),
                index,
                source,
            })?;
    }
    Ok(())
}

/// Run every teardown hook. The first failure is returned; later ones are
/// logged.
fn teardown_all(stages: &mut [Box<dyn Stage>], data: &ArrayD<f32>, meta: &Meta) -> Result<()> {
    let mut first = None;
    for (index, stage) in stages.iter_mut().enumerate() {
        if let Err(source) = stage.teardown_t(data, meta) {
            let err = PlanError::Teardown {
                stage: stage.name().to_string(),
                index,
                source,
            };
            if first.is_none() {
                first = Some(err);
            } else {
                warn!(error = %err, "Additional teardown failure");
            }
        }
    }
    first.map_or(Ok(()), Err)
}

/// Resolve the OTF for the single selected channel and acquire a context
/// sized for `shape`. The context's output shape is published into `meta`.
fn open_scope(
    stages: &[Box<dyn Stage>],
    backend: &dyn DeconBackend,
    shape: &[usize],
    meta: &mut Meta,
) -> Result<DeviceScope> {
    let settings = stages
        .iter()
        .find(|s| s.kind() == StageKind::Deconvolution)
        .and_then(|s| s.decon_settings().cloned())
        .unwrap_or_default();
    let wavelength = meta
        .wavelengths
        .first()
        .copied()
        .ok_or(PlanError::NotReady)?;
    let params = Arc::clone(&meta.params);

    let otf = otf::resolve(
        wavelength,
        &settings.otf_dir,
        params.date,
        params.mask.as_deref(),
    )?;
    let request = ContextRequest {
        shape: ContextRequest::volume_shape(shape)?,
        otf,
        dz: params.dz,
        dx: params.dx,
        deskew: params.deskew,
        angle: params.angle,
        width: settings.width,
    };
    let context = backend.acquire(&request)?;
    debug!(
        backend = backend.name(),
        otf = %request.otf.path.display(),
        out_shape = ?context.out_shape(),
        "Device scope opened"
    );
    meta.out_shape = Some(context.out_shape().to_vec());
    Ok(DeviceScope::open(context))
}

#[allow(clippy::too_many_arguments)]
fn run_chain(
    stages: &mut [Box<dyn Stage>],
    data: ArrayD<f32>,
    meta: &mut Meta,
    scope: &mut DeviceScope,
    preview: bool,
    t: usize,
    abort: &AbortHandle,
    observer: &dyn PlanObserver,
) -> Result<Option<ArrayD<f32>>> {
    let mut data = data;
    for (index, stage) in stages.iter_mut().enumerate() {
        if preview {
            if abort.is_aborted() {
                info!(t, stage = stage.name(), "Abort observed, discarding partial result");
                return Ok(None);
            }
            observer.stage_starting(t, index, stage.name(), stage.verb());
        }
        debug!(t, stage = stage.name(), position = index + 1, "{}", stage.verb());
        data = stage
            .process(data, meta, scope)
            .map_err(|source| PlanError::Process {
                stage: stage.name().to_string(),
                index,
                source,
            })?;
    }
    Ok(Some(data))
}
