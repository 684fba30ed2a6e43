//! Data sources: where slabs come from.
//!
//! A [`DataSource`] exposes static acquisition parameters and loads one
//! timepoint at a time for a selection of channels. Loading is lazy; nothing
//! is read until [`DataSource::load_slab`] is called.

mod memory;
mod stack_dir;

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_DESKEW_ANGLE;
use crate::error::SourceError;
use crate::slab::Slab;

pub use memory::InMemorySource;
pub use stack_dir::{SampleFormat, StackDir, StackSettings};

/// Static acquisition parameters of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    /// Number of timepoints.
    pub nt: usize,
    /// Number of channels.
    pub nc: usize,
    /// Emission wavelength per channel, in nanometres.
    pub wavelengths: Vec<f64>,
    /// Volume shape per channel and timepoint as `[nz, ny, nx]`.
    pub shape: [usize; 3],
    /// Z step in microns.
    pub dz: f64,
    /// Lateral pixel size in microns.
    #[serde(default = "default_dx")]
    pub dx: f64,
    /// Whether the stack was acquired by stage scanning and needs deskewing.
    #[serde(default)]
    pub deskew: bool,
    /// Light-sheet angle in degrees, used when deskewing.
    #[serde(default = "default_angle")]
    pub angle: f64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Identifier of the excitation mask, used to pick a matching OTF.
    #[serde(default)]
    pub mask: Option<String>,
}

fn default_dx() -> f64 {
    0.104
}

fn default_angle() -> f64 {
    DEFAULT_DESKEW_ANGLE
}

impl AcquisitionParams {
    /// Parameters for a simple dataset with default optics.
    pub fn new(nt: usize, wavelengths: Vec<f64>, shape: [usize; 3]) -> Self {
        Self {
            nt,
            nc: wavelengths.len(),
            wavelengths,
            shape,
            dz: 0.5,
            dx: default_dx(),
            deskew: false,
            angle: default_angle(),
            date: None,
            mask: None,
        }
    }

    /// Check internal consistency (counts, wavelengths, shape).
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.nc == 0 || self.nt == 0 {
            return Err(SourceError::Settings(format!(
                "dataset must have at least one channel and timepoint (nc={}, nt={})",
                self.nc, self.nt
            )));
        }
        if self.wavelengths.len() < self.nc {
            return Err(SourceError::Settings(format!(
                "{} wavelengths listed for {} channels",
                self.wavelengths.len(),
                self.nc
            )));
        }
        if self.shape.contains(&0) {
            return Err(SourceError::Settings(format!(
                "volume shape {:?} has an empty dimension",
                self.shape
            )));
        }
        let [nz, ny, nx] = self.shape;
        let bytes = nz
            .checked_mul(ny)
            .and_then(|n| n.checked_mul(nx))
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()));
        if bytes.is_none() {
            return Err(SourceError::Settings(format!(
                "volume shape {:?} is too large",
                self.shape
            )));
        }
        Ok(())
    }
}

/// A dataset that can produce per-timepoint slabs.
pub trait DataSource: Send + Sync {
    /// Short identity used in error messages (usually a directory name).
    fn name(&self) -> String;

    /// Filesystem location of the dataset, if it has one.
    fn location(&self) -> Option<&Path> {
        None
    }

    fn params(&self) -> &AcquisitionParams;

    /// Load timepoint `t` for `channels`.
    ///
    /// A single channel yields a `ZYX` slab; several channels yield `CZYX`
    /// with channels stacked in the order given.
    fn load_slab(&self, t: usize, channels: &[usize]) -> Result<Slab, SourceError>;

    fn timepoint_count(&self) -> usize {
        self.params().nt
    }

    fn channel_count(&self) -> usize {
        self.params().nc
    }
}

/// Bounds-check a slab request against `params`.
pub(crate) fn check_request(
    params: &AcquisitionParams,
    t: usize,
    channels: &[usize],
) -> Result<(), SourceError> {
    if t >= params.nt {
        return Err(SourceError::TimepointOutOfRange {
            index: t,
            total: params.nt,
        });
    }
    if let Some(&c) = channels.iter().find(|&&c| c >= params.nc) {
        return Err(SourceError::ChannelOutOfRange {
            index: c,
            total: params.nc,
        });
    }
    Ok(())
}
