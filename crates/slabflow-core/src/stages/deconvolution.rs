use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayView3, ArrayViewD, Ix3};
use rayon::prelude::*;
use tracing::debug;

use crate::compute::{ContextRequest, DeconBackend, DeviceScope};
use crate::consts::DEFAULT_RL_ITERATIONS;
use crate::error::{ContextError, OtfError, StageError};
use crate::meta::Meta;
use crate::otf;
use crate::slab::channel_views;
use crate::source::DataSource;
use crate::stage::{
    DeconSettings, ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind,
};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("otf_dir", ParamDefault::Text(""), "directory holding the OTF files"),
    ParamSpec::new(
        "iterations",
        ParamDefault::Int(DEFAULT_RL_ITERATIONS as i64),
        "Richardson-Lucy iterations",
    ),
    ParamSpec::new("width", ParamDefault::Int(0), "output width in pixels (0 = natural)"),
];

/// Richardson-Lucy deconvolution (with optional deskew).
pub struct DeconvolutionFactory {
    backend: Arc<dyn DeconBackend>,
}

impl DeconvolutionFactory {
    pub fn new(backend: Arc<dyn DeconBackend>) -> Self {
        Self { backend }
    }
}

impl StageFactory for DeconvolutionFactory {
    fn name(&self) -> &str {
        "deconvolution"
    }

    fn kind(&self) -> StageKind {
        StageKind::Deconvolution
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        "Richardson-Lucy deconvolution against per-wavelength OTFs"
    }

    fn from_data_source(
        &self,
        _source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let reader = ParamReader::new(params, PARAMS);
        let otf_dir = PathBuf::from(reader.text("otf_dir")?);
        if otf_dir.as_os_str().is_empty() {
            return Err(StageError::invalid("otf_dir", "an OTF directory is required"));
        }
        if !otf_dir.is_dir() {
            return Err(OtfError::MissingDirectory(otf_dir).into());
        }
        Ok(Box::new(Deconvolution {
            settings: DeconSettings {
                otf_dir,
                width: reader.usize("width")?,
            },
            iterations: reader.usize("iterations")?,
            backend: Arc::clone(&self.backend),
        }))
    }
}

struct Deconvolution {
    settings: DeconSettings,
    iterations: usize,
    backend: Arc<dyn DeconBackend>,
}

impl Deconvolution {
    /// Acquire a context for one channel and deconvolve it. The context is
    /// released when this returns.
    fn deconvolve_channel(
        &self,
        volume: ArrayView3<'_, f32>,
        wavelength: f64,
        meta: &Meta,
    ) -> Result<ArrayD<f32>, StageError> {
        let params = &meta.params;
        let otf = otf::resolve(
            wavelength,
            &self.settings.otf_dir,
            params.date,
            params.mask.as_deref(),
        )?;
        let (nz, ny, nx) = volume.dim();
        let request = ContextRequest {
            shape: [nz, ny, nx],
            otf,
            dz: params.dz,
            dx: params.dx,
            deskew: params.deskew,
            angle: params.angle,
            width: self.settings.width,
        };
        let mut context = self.backend.acquire(&request)?;
        Ok(context.deconvolve(volume, self.iterations)?.into_dyn())
    }
}

fn as_volume<'a>(view: ArrayViewD<'a, f32>) -> Result<ArrayView3<'a, f32>, StageError> {
    let shape = view.shape().to_vec();
    view.into_dimensionality::<Ix3>()
        .map_err(|_| StageError::Context(ContextError::Dimensionality(shape)))
}

impl Stage for Deconvolution {
    fn name(&self) -> &str {
        "deconvolution"
    }

    fn verb(&self) -> &str {
        "Deconvolving"
    }

    fn kind(&self) -> StageKind {
        StageKind::Deconvolution
    }

    fn decon_settings(&self) -> Option<&DeconSettings> {
        Some(&self.settings)
    }

    fn process(
        &mut self,
        data: ArrayD<f32>,
        meta: &mut Meta,
        scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError> {
        let axes = meta.current_axes()?.clone();

        if let Some(context) = scope.context() {
            let volume = as_volume(data.view())?;
            debug!(iterations = self.iterations, "Deconvolving with scoped context");
            return Ok(context.deconvolve(volume, self.iterations)?.into_dyn());
        }

        let views = channel_views(&data, &axes);
        if views.len() > meta.wavelengths.len() {
            return Err(StageError::Shape {
                shape: data.shape().to_vec(),
                reason: format!(
                    "{} channels in data but {} wavelengths in metadata",
                    views.len(),
                    meta.wavelengths.len()
                ),
            });
        }
        debug!(
            channels = views.len(),
            iterations = self.iterations,
            "Deconvolving with per-channel contexts"
        );
        let this: &Self = self;
        let meta_ref: &Meta = meta;
        let results: Vec<ArrayD<f32>> = views
            .into_par_iter()
            .zip(meta_ref.wavelengths.par_iter())
            .map(|(view, &wavelength)| {
                this.deconvolve_channel(as_volume(view)?, wavelength, meta_ref)
            })
            .collect::<Result<_, StageError>>()?;

        if !axes.contains('C') {
            return results.into_iter().next().ok_or_else(|| StageError::Shape {
                shape: data.shape().to_vec(),
                reason: "no channel to deconvolve".into(),
            });
        }
        let channel_axis = axes.require('C')?;
        let stacked: Vec<ArrayViewD<'_, f32>> = results.iter().map(|r| r.view()).collect();
        ndarray::stack(channel_axis, &stacked).map_err(|e| StageError::Shape {
            shape: data.shape().to_vec(),
            reason: e.to_string(),
        })
    }
}
