use ndarray::ArrayD;

use crate::compute::DeviceScope;
use crate::error::StageError;
use crate::meta::Meta;
use crate::source::DataSource;
use crate::stage::{ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind};

const PARAMS: &[ParamSpec] = &[ParamSpec::new(
    "axis",
    ParamDefault::Text("Z"),
    "spatial axis to project along (Z, Y or X)",
)];

/// Maximum-intensity projection along one spatial axis.
pub struct MaxProjectionFactory;

impl StageFactory for MaxProjectionFactory {
    fn name(&self) -> &str {
        "max_projection"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        "Maximum-intensity projection along Z, Y or X"
    }

    fn from_data_source(
        &self,
        _source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let text = ParamReader::new(params, PARAMS).text("axis")?;
        let axis = match text.to_ascii_uppercase().as_str() {
            "Z" => 'Z',
            "Y" => 'Y',
            "X" => 'X',
            _ => {
                return Err(StageError::invalid(
                    "axis",
                    format!("expected Z, Y or X, got '{text}'"),
                ))
            }
        };
        Ok(Box::new(MaxProjection { axis }))
    }
}

struct MaxProjection {
    axis: char,
}

impl Stage for MaxProjection {
    fn name(&self) -> &str {
        "max_projection"
    }

    fn verb(&self) -> &str {
        "Projecting"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn process(
        &mut self,
        data: ArrayD<f32>,
        meta: &mut Meta,
        _scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError> {
        let axes = meta.current_axes()?;
        let axis = axes.require(self.axis)?;
        let projected = data.map_axis(axis, |lane| lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v)));
        meta.axes = Some(axes.without(self.axis));
        Ok(projected)
    }
}
