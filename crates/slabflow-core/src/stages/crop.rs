use std::ops::Range;

use ndarray::{ArrayD, Slice};
use tracing::debug;

use crate::compute::DeviceScope;
use crate::error::StageError;
use crate::meta::Meta;
use crate::source::DataSource;
use crate::stage::{ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("z_min", ParamDefault::Int(0), "first Z plane kept"),
    ParamSpec::new("z_max", ParamDefault::Int(0), "end of the Z range (exclusive, 0 = full)"),
    ParamSpec::new("y_min", ParamDefault::Int(0), "first row kept"),
    ParamSpec::new("y_max", ParamDefault::Int(0), "end of the Y range (exclusive, 0 = full)"),
    ParamSpec::new("x_min", ParamDefault::Int(0), "first column kept"),
    ParamSpec::new("x_max", ParamDefault::Int(0), "end of the X range (exclusive, 0 = full)"),
];

/// Crop the spatial axes to a fixed box.
pub struct CropFactory;

impl StageFactory for CropFactory {
    fn name(&self) -> &str {
        "crop"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        "Crop Z, Y and X to a box"
    }

    fn from_data_source(
        &self,
        source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let reader = ParamReader::new(params, PARAMS);
        let [nz, ny, nx] = source.params().shape;
        let z = axis_range(&reader, "z", nz)?;
        let y = axis_range(&reader, "y", ny)?;
        let x = axis_range(&reader, "x", nx)?;
        Ok(Box::new(Crop {
            ranges: [('Z', z), ('Y', y), ('X', x)],
        }))
    }
}

/// Read `{axis}_min`/`{axis}_max` and check them against the axis length.
fn axis_range(reader: &ParamReader<'_>, axis: &str, len: usize) -> Result<Range<usize>, StageError> {
    let min_name = format!("{axis}_min");
    let max_name = format!("{axis}_max");
    let start = reader.usize(&min_name)?;
    let end = match reader.usize(&max_name)? {
        0 => len,
        end => end,
    };
    if end > len {
        return Err(StageError::invalid(
            &max_name,
            format!("{end} exceeds the axis length {len}"),
        ));
    }
    if start >= end {
        return Err(StageError::invalid(
            &min_name,
            format!("{start} must be below {max_name} ({end})"),
        ));
    }
    Ok(start..end)
}

struct Crop {
    ranges: [(char, Range<usize>); 3],
}

impl Stage for Crop {
    fn name(&self) -> &str {
        "crop"
    }

    fn verb(&self) -> &str {
        "Cropping"
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
        let axes = meta.current_axes()?;
        for (letter, range) in &self.ranges {
            if !axes.contains(*letter) {
                continue;
            }
            let axis = axes.require(*letter)?;
            let len = data.len_of(axis);
            if range.end > len {
                return Err(StageError::Shape {
                    shape: data.shape().to_vec(),
                    reason: format!("crop {letter} {range:?} exceeds axis length {len}"),
                });
            }
            data.slice_axis_inplace(axis, Slice::from(range.clone()));
        }
        debug!(shape = ?data.shape(), "Cropped");
        if data.is_standard_layout() {
            Ok(data)
        } else {
            Ok(data.as_standard_layout().into_owned())
        }
    }
}
