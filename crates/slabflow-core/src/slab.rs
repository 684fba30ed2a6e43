use std::fmt;

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Axis ordering of a slab, one letter per dimension (e.g. `"CZYX"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axes(String);

impl Axes {
    pub fn new(letters: &str) -> Self {
        Self(letters.to_ascii_uppercase())
    }

    /// `ZYX` for a single channel, `CZYX` otherwise.
    pub fn for_channels(channel_count: usize) -> Self {
        if channel_count == 1 {
            Self::new("ZYX")
        } else {
            Self::new("CZYX")
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, axis: char) -> Option<usize> {
        let axis = axis.to_ascii_uppercase();
        self.0.chars().position(|c| c == axis)
    }

    pub fn contains(&self, axis: char) -> bool {
        self.position(axis).is_some()
    }

    /// Axis index of `axis`, or a stage error naming the missing axis.
    pub fn require(&self, axis: char) -> Result<Axis, StageError> {
        self.position(axis).map(Axis).ok_or(StageError::MissingAxis {
            axis,
            axes: self.0.clone(),
        })
    }

    /// Ordering with `axis` dropped (after a projection along it).
    pub fn without(&self, axis: char) -> Self {
        let axis = axis.to_ascii_uppercase();
        Self(self.0.chars().filter(|&c| c != axis).collect())
    }
}

impl fmt::Display for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One timepoint's worth of data for the selected channels.
#[derive(Clone, Debug)]
pub struct Slab {
    pub data: ArrayD<f32>,
    pub axes: Axes,
}

impl Slab {
    pub fn new(data: ArrayD<f32>, axes: Axes) -> Self {
        Self { data, axes }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Split `data` into per-channel views following `axes`.
///
/// Data without a `C` axis is treated as a single channel.
pub fn channel_views<'a>(
    data: &'a ArrayD<f32>,
    axes: &Axes,
) -> Vec<ndarray::ArrayViewD<'a, f32>> {
    match axes.position('C') {
        Some(c) => data.axis_iter(Axis(c)).collect(),
        None => vec![data.view()],
    }
}
