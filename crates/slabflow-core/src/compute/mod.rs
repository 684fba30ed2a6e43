//! Deconvolution device contexts.
//!
//! A [`DeconBackend`] hands out [`DeconContext`]s sized for one volume shape
//! and OTF. A context is held for the duration of one timepoint and released
//! when dropped, so every exit path (success, stage error) releases it.

pub mod cpu;

use ndarray::{Array3, ArrayView3};

use crate::error::ContextError;
use crate::otf::Otf;

pub use cpu::CpuBackend;

/// Everything needed to set up a context.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextRequest {
    /// Raw volume shape `[nz, ny, nx]`.
    pub shape: [usize; 3],
    pub otf: Otf,
    pub dz: f64,
    pub dx: f64,
    pub deskew: bool,
    /// Light-sheet angle in degrees.
    pub angle: f64,
    /// Requested output width; 0 keeps the natural width.
    pub width: usize,
}

impl ContextRequest {
    /// Shape a 3-D slab for use as `ContextRequest::shape`.
    pub fn volume_shape(shape: &[usize]) -> Result<[usize; 3], ContextError> {
        match *shape {
            [nz, ny, nx] => Ok([nz, ny, nx]),
            _ => Err(ContextError::Dimensionality(shape.to_vec())),
        }
    }
}

/// An acquired deconvolution context. Dropping it releases the device.
pub trait DeconContext: Send {
    /// Shape of volumes produced by [`deconvolve`](Self::deconvolve).
    fn out_shape(&self) -> &[usize];

    fn deconvolve(
        &mut self,
        volume: ArrayView3<'_, f32>,
        iterations: usize,
    ) -> Result<Array3<f32>, ContextError>;
}

/// Factory for deconvolution contexts.
pub trait DeconBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire a context. Acquisition is all-or-nothing: on error nothing is
    /// held.
    fn acquire(&self, request: &ContextRequest) -> Result<Box<dyn DeconContext>, ContextError>;
}

/// The context (if any) opened by the executor for the current timepoint.
#[derive(Default)]
pub struct DeviceScope {
    context: Option<Box<dyn DeconContext>>,
}

impl DeviceScope {
    /// A scope without a context.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn open(context: Box<dyn DeconContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn is_open(&self) -> bool {
        self.context.is_some()
    }

    pub fn out_shape(&self) -> Option<&[usize]> {
        self.context.as_deref().map(|c| c.out_shape())
    }

    pub fn context(&mut self) -> Option<&mut (dyn DeconContext + 'static)> {
        self.context.as_deref_mut()
    }
}
