#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::{Array3, ArrayD, ArrayView3, IxDyn};
use slabflow_core::compute::{ContextRequest, DeconBackend, DeconContext, DeviceScope};
use slabflow_core::error::{ContextError, SourceError, StageError};
use slabflow_core::meta::Meta;
use slabflow_core::otf::write_psf;
use slabflow_core::plan::AbortHandle;
use slabflow_core::slab::{Axes, Slab};
use slabflow_core::source::{AcquisitionParams, DataSource, InMemorySource};
use slabflow_core::stage::{
    DeconSettings, ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind,
    StageSpec,
};

pub const SHAPE: [usize; 3] = [4, 8, 8];

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Acquisition parameters with wavelengths 488, 560, 632, ... nm.
pub fn acquisition(nt: usize, nc: usize) -> AcquisitionParams {
    let wavelengths = (0..nc).map(|c| 488.0 + 72.0 * c as f64).collect();
    AcquisitionParams::new(nt, wavelengths, SHAPE)
}

/// Constant voxel value of timepoint `t`, channel `c` in [`memory_source`].
pub fn voxel_value(t: usize, c: usize) -> f32 {
    (100 * t + 10 * c + 1) as f32
}

pub fn memory_source(nt: usize, nc: usize) -> Arc<InMemorySource> {
    let [nz, ny, nx] = SHAPE;
    let source = InMemorySource::from_fn("mem", acquisition(nt, nc), move |t, c| {
        Array3::from_elem((nz, ny, nx), voxel_value(t, c))
    })
    .expect("valid in-memory source");
    Arc::new(source)
}

/// Source that skips parameter validation and counts loads.
pub struct MockSource {
    pub params: AcquisitionParams,
    pub loads: AtomicUsize,
    pub fail_at: Option<usize>,
}

impl MockSource {
    pub fn new(params: AcquisitionParams) -> Self {
        Self {
            params,
            loads: AtomicUsize::new(0),
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, t: usize) -> Self {
        self.fail_at = Some(t);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DataSource for MockSource {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn params(&self) -> &AcquisitionParams {
        &self.params
    }

    fn load_slab(&self, t: usize, channels: &[usize]) -> Result<Slab, SourceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(t) {
            return Err(SourceError::Settings(format!("cannot read timepoint {t}")));
        }
        let [nz, ny, nx] = self.params.shape;
        let data = if channels.len() == 1 {
            ArrayD::zeros(IxDyn(&[nz, ny, nx]))
        } else {
            ArrayD::zeros(IxDyn(&[channels.len(), nz, ny, nx]))
        };
        Ok(Slab::new(data, Axes::for_channels(channels.len())))
    }
}

// ---------------------------------------------------------------------------
// Probe stages
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Setup(String, usize),
    Process(String, usize),
    Teardown(String, usize),
}

/// What a probe saw while processing: whether a device scope was open and
/// the published output shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeSeen {
    pub stage: String,
    pub t: usize,
    pub open: bool,
    pub out_shape: Option<Vec<usize>>,
}

/// Shared log of probe activity.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    scopes: Arc<Mutex<Vec<ScopeSeen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scopes(&self) -> Vec<ScopeSeen> {
        self.scopes.lock().unwrap().clone()
    }

    /// Timepoints at which `stage` ran `process`.
    pub fn processed(&self, stage: &str) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Process(name, t) if name == stage => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Stage names whose teardown ran, in order.
    pub fn teardowns(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Teardown(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

const PROBE_PARAMS: &[ParamSpec] = &[ParamSpec::new(
    "gain",
    ParamDefault::Float(1.0),
    "multiplier applied to the data",
)];

/// Configurable stage type that records every hook call.
#[derive(Clone)]
pub struct Probe {
    pub name: String,
    pub kind: StageKind,
    pub recorder: Recorder,
    pub decon: Option<DeconSettings>,
    pub fail_construct: Option<String>,
    pub fail_setup_at: Option<usize>,
    pub fail_process_at: Option<usize>,
    pub fail_teardown_at: Option<usize>,
    pub abort_at: Option<(AbortHandle, usize)>,
}

impl Probe {
    pub fn new(name: &str, kind: StageKind, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            kind,
            recorder: recorder.clone(),
            decon: None,
            fail_construct: None,
            fail_setup_at: None,
            fail_process_at: None,
            fail_teardown_at: None,
            abort_at: None,
        }
    }

    pub fn transform(name: &str, recorder: &Recorder) -> Self {
        Self::new(name, StageKind::Transform, recorder)
    }

    pub fn writer(name: &str, recorder: &Recorder) -> Self {
        Self::new(name, StageKind::Writer, recorder)
    }

    pub fn deconvolution(name: &str, recorder: &Recorder, otf_dir: &Path) -> Self {
        let mut probe = Self::new(name, StageKind::Deconvolution, recorder);
        probe.decon = Some(DeconSettings {
            otf_dir: otf_dir.to_path_buf(),
            width: 0,
        });
        probe
    }

    pub fn failing_construct(mut self, reason: &str) -> Self {
        self.fail_construct = Some(reason.to_string());
        self
    }

    pub fn failing_setup_at(mut self, t: usize) -> Self {
        self.fail_setup_at = Some(t);
        self
    }

    pub fn failing_process_at(mut self, t: usize) -> Self {
        self.fail_process_at = Some(t);
        self
    }

    pub fn failing_teardown_at(mut self, t: usize) -> Self {
        self.fail_teardown_at = Some(t);
        self
    }

    /// Abort `handle` right after processing timepoint `t`.
    pub fn aborting(mut self, handle: AbortHandle, t: usize) -> Self {
        self.abort_at = Some((handle, t));
        self
    }

    pub fn spec(self) -> StageSpec {
        StageSpec::new(Arc::new(self), Params::new())
    }

    pub fn spec_with(self, params: Params) -> StageSpec {
        StageSpec::new(Arc::new(self), params)
    }
}

impl StageFactory for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn parameters(&self) -> &[ParamSpec] {
        PROBE_PARAMS
    }

    fn from_data_source(
        &self,
        _source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        if let Some(reason) = &self.fail_construct {
            return Err(StageError::Message(reason.clone()));
        }
        let gain = ParamReader::new(params, PROBE_PARAMS).float("gain")? as f32;
        Ok(Box::new(ProbeStage {
            probe: self.clone(),
            gain,
        }))
    }
}

struct ProbeStage {
    probe: Probe,
    gain: f32,
}

impl Stage for ProbeStage {
    fn name(&self) -> &str {
        &self.probe.name
    }

    fn verb(&self) -> &str {
        "Probing"
    }

    fn kind(&self) -> StageKind {
        self.probe.kind
    }

    fn decon_settings(&self) -> Option<&DeconSettings> {
        self.probe.decon.as_ref()
    }

    fn setup_t(&mut self, _data: &ArrayD<f32>, meta: &Meta) -> Result<(), StageError> {
        let t = meta.current_t()?;
        self.probe.recorder.push(Call::Setup(self.probe.name.clone(), t));
        if self.probe.fail_setup_at == Some(t) {
            return Err(StageError::Message("setup failed".into()));
        }
        Ok(())
    }

    fn teardown_t(&mut self, _data: &ArrayD<f32>, meta: &Meta) -> Result<(), StageError> {
        let t = meta.current_t()?;
        self.probe
            .recorder
            .push(Call::Teardown(self.probe.name.clone(), t));
        if self.probe.fail_teardown_at == Some(t) {
            return Err(StageError::Message("teardown failed".into()));
        }
        Ok(())
    }

    fn process(
        &mut self,
        data: ArrayD<f32>,
        meta: &mut Meta,
        scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError> {
        let t = meta.current_t()?;
        self.probe
            .recorder
            .push(Call::Process(self.probe.name.clone(), t));
        self.probe.recorder.scopes.lock().unwrap().push(ScopeSeen {
            stage: self.probe.name.clone(),
            t,
            open: scope.is_open(),
            out_shape: meta.out_shape.clone(),
        });
        if self.probe.fail_process_at == Some(t) {
            return Err(StageError::Message("process failed".into()));
        }
        if let Some((handle, at)) = &self.probe.abort_at {
            if *at == t {
                handle.abort();
            }
        }
        meta.insert(format!("seen_by_{}", self.probe.name), t);
        Ok(data.mapv(|v| v * self.gain))
    }
}

// ---------------------------------------------------------------------------
// Device backend
// ---------------------------------------------------------------------------

/// Backend whose contexts copy their input and count acquisitions/releases.
#[derive(Default)]
pub struct CountingBackend {
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub requests: Mutex<Vec<ContextRequest>>,
    pub fail: bool,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DeconBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn acquire(&self, request: &ContextRequest) -> Result<Box<dyn DeconContext>, ContextError> {
        if self.fail {
            return Err(ContextError::Device("no device available".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let mut out_shape = request.shape.to_vec();
        if request.width > 0 {
            out_shape[2] = request.width;
        }
        Ok(Box::new(CountingContext {
            out_shape,
            released: Arc::clone(&self.released),
        }))
    }
}

struct CountingContext {
    out_shape: Vec<usize>,
    released: Arc<AtomicUsize>,
}

impl DeconContext for CountingContext {
    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn deconvolve(
        &mut self,
        volume: ArrayView3<'_, f32>,
        _iterations: usize,
    ) -> Result<Array3<f32>, ContextError> {
        Ok(volume.to_owned())
    }
}

impl Drop for CountingContext {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// OTF files
// ---------------------------------------------------------------------------

/// A single-voxel PSF: deconvolution against it is the identity.
pub fn delta_psf() -> Array3<f32> {
    Array3::from_elem((1, 1, 1), 1.0)
}

/// Temporary OTF directory holding a delta PSF for each file name given.
pub fn otf_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    for name in names {
        write_psf(&dir.path().join(name), &delta_psf()).expect("write PSF");
    }
    dir
}
