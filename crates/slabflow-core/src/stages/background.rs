use ndarray::{ArrayD, Axis};
use tracing::debug;

use crate::compute::DeviceScope;
use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::error::StageError;
use crate::meta::Meta;
use crate::source::DataSource;
use crate::stage::{ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("value", ParamDefault::Float(100.0), "constant camera offset"),
    ParamSpec::new("auto", ParamDefault::Bool(false), "use each channel's minimum instead"),
];

/// Subtract the camera background and clamp at zero.
pub struct BackgroundFactory;

impl StageFactory for BackgroundFactory {
    fn name(&self) -> &str {
        "background"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        "Subtract a constant (or per-channel minimum) background"
    }

    fn from_data_source(
        &self,
        _source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let reader = ParamReader::new(params, PARAMS);
        let value = reader.float("value")?;
        if !value.is_finite() || value < 0.0 {
            return Err(StageError::invalid("value", format!("must be >= 0, got {value}")));
        }
        Ok(Box::new(Background {
            value: value as f32,
            auto: reader.bool("auto")?,
        }))
    }
}

struct Background {
    value: f32,
    auto: bool,
}

fn subtract(data: &mut ArrayD<f32>, offset: f32) {
    if data.len() >= PARALLEL_VOXEL_THRESHOLD {
        data.par_mapv_inplace(|v| (v - offset).max(0.0));
    } else {
        data.mapv_inplace(|v| (v - offset).max(0.0));
    }
}

fn minimum<'a>(values: impl IntoIterator<Item = &'a f32>) -> f32 {
    values.into_iter().copied().fold(f32::INFINITY, f32::min)
}

impl Stage for Background {
    fn name(&self) -> &str {
        "background"
    }

    fn verb(&self) -> &str {
        "Subtracting background"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn process(
        &mut self,
        mut data: ArrayD<f32>,
        meta: &mut Meta,
        _scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError> {
        if !meta.has_background {
            debug!("Background already removed, skipping");
            return Ok(data);
        }
        if self.auto {
            match meta.current_axes()?.position('C') {
                Some(c) => {
                    for mut channel in data.axis_iter_mut(Axis(c)) {
                        let offset = minimum(channel.iter());
                        channel.mapv_inplace(|v| (v - offset).max(0.0));
                    }
                }
                None => {
                    let offset = minimum(data.iter());
                    subtract(&mut data, offset);
                }
            }
        } else {
            subtract(&mut data, self.value);
        }
        meta.has_background = false;
        Ok(data)
    }
}
