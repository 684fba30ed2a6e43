//! The stage contract.
//!
//! A stage type is described by a [`StageFactory`]; a plan turns each active
//! [`StageSpec`] into a boxed [`Stage`] by calling
//! [`StageFactory::from_data_source`]. The [`StageKind`] tag tells the
//! executor which stages persist output and which need a device context.

mod params;
mod registry;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::compute::DeviceScope;
use crate::error::StageError;
use crate::meta::Meta;
use crate::source::DataSource;

pub use params::{undeclared_keys, ParamDefault, ParamReader, ParamSpec, ParamValue, Params};
pub use registry::StageRegistry;

/// Capability tag of a stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// Transforms data and hands it on.
    Transform,
    /// Terminal stage that persists output.
    Writer,
    /// Needs a deconvolution context; triggers device scoping.
    Deconvolution,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => write!(f, "Transform"),
            Self::Writer => write!(f, "Writer"),
            Self::Deconvolution => write!(f, "Deconvolution"),
        }
    }
}

/// Settings a deconvolution stage hands to the executor for device scoping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeconSettings {
    pub otf_dir: PathBuf,
    /// Requested output width in pixels; 0 keeps the natural width.
    pub width: usize,
}

/// A stage type: identity, declared parameters and a constructor.
pub trait StageFactory: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// Parameters accepted by [`from_data_source`](Self::from_data_source).
    fn parameters(&self) -> &[ParamSpec] {
        &[]
    }

    /// One-line description shown in stage listings.
    fn description(&self) -> &str {
        ""
    }

    /// Build a stage instance for `source` from `params`.
    fn from_data_source(
        &self,
        source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError>;
}

/// An instantiated stage.
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// Present-tense description for progress displays ("Deconvolving").
    fn verb(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// Settings used for device scoping. Only meaningful for
    /// [`StageKind::Deconvolution`] stages.
    fn decon_settings(&self) -> Option<&DeconSettings> {
        None
    }

    /// Called on every stage before the chain runs for a timepoint.
    fn setup_t(&mut self, _data: &ArrayD<f32>, _meta: &Meta) -> Result<(), StageError> {
        Ok(())
    }

    /// Called on every stage after the chain, even when the chain failed.
    fn teardown_t(&mut self, _data: &ArrayD<f32>, _meta: &Meta) -> Result<(), StageError> {
        Ok(())
    }

    /// Transform `data`, updating `meta` as needed.
    ///
    /// `scope` holds the timepoint's deconvolution context when the executor
    /// opened one.
    fn process(
        &mut self,
        data: ArrayD<f32>,
        meta: &mut Meta,
        scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError>;
}

/// A pipeline entry before instantiation.
#[derive(Clone)]
pub struct StageSpec {
    pub stage_type: Arc<dyn StageFactory>,
    pub params: Params,
    pub active: bool,
    /// Editor-only flag, carried through untouched.
    pub collapsed: bool,
}

impl StageSpec {
    pub fn new(stage_type: Arc<dyn StageFactory>, params: Params) -> Self {
        Self {
            stage_type,
            params,
            active: true,
            collapsed: false,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn name(&self) -> &str {
        self.stage_type.name()
    }

    pub fn kind(&self) -> StageKind {
        self.stage_type.kind()
    }

    pub fn is_writer(&self) -> bool {
        self.kind() == StageKind::Writer
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("stage_type", &self.stage_type.name())
            .field("params", &self.params)
            .field("active", &self.active)
            .field("collapsed", &self.collapsed)
            .finish()
    }
}
