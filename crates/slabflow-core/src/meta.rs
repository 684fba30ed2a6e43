//! The metadata record threaded through every stage call.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StageError;
use crate::slab::Axes;
use crate::source::{AcquisitionParams, DataSource};
use crate::stage::ParamValue;

/// Mutable metadata shared by all stages during one execution.
///
/// Required keys are named fields; anything a stage wants to hand to a later
/// stage goes into `extra`. The executor only ever sets fields, it never
/// clears them.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// Selected channel indices, in processing order.
    pub channels: Vec<usize>,
    pub nc: usize,
    pub nt: usize,
    /// Wavelengths of the selected channels.
    pub wavelengths: Vec<f64>,
    pub params: Arc<AcquisitionParams>,
    /// True while the data still carries camera background.
    pub has_background: bool,
    /// Timepoint currently being processed.
    pub t: Option<usize>,
    /// Axis ordering of the data as handed to the next stage.
    pub axes: Option<Axes>,
    /// Output shape published by a scoped deconvolution context.
    pub out_shape: Option<Vec<usize>>,
    pub extra: BTreeMap<String, ParamValue>,
}

impl Meta {
    pub fn new(source: &dyn DataSource, t_range: &[usize], c_range: &[usize]) -> Self {
        let params = source.params();
        Self {
            channels: c_range.to_vec(),
            nc: c_range.len(),
            nt: t_range.len(),
            wavelengths: c_range.iter().map(|&c| params.wavelengths[c]).collect(),
            params: Arc::new(params.clone()),
            has_background: true,
            t: None,
            axes: None,
            out_shape: None,
            extra: BTreeMap::new(),
        }
    }

    /// Current axis ordering; stages call this before indexing axes.
    pub fn current_axes(&self) -> Result<&Axes, StageError> {
        self.axes
            .as_ref()
            .ok_or_else(|| StageError::Message("axis ordering not set".into()))
    }

    pub fn current_t(&self) -> Result<usize, StageError> {
        self.t
            .ok_or_else(|| StageError::Message("timepoint not set".into()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.extra.get(key)
    }
}
