use ndarray::ArrayD;
use tracing::info;

use crate::compute::DeviceScope;
use crate::error::StageError;
use crate::meta::Meta;
use crate::source::DataSource;
use crate::stage::{ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new("greeting", ParamDefault::Text("Processing"), "message logged per timepoint"),
    ParamSpec::new("print_shape", ParamDefault::Bool(false), "include the data shape"),
];

/// Pass-through stage that logs each timepoint it sees.
pub struct AnnounceFactory;

impl StageFactory for AnnounceFactory {
    fn name(&self) -> &str {
        "announce"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        "Log a message for every timepoint; data passes through unchanged"
    }

    fn from_data_source(
        &self,
        source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let reader = ParamReader::new(params, PARAMS);
        Ok(Box::new(Announce {
            source: source.name(),
            greeting: reader.text("greeting")?,
            print_shape: reader.bool("print_shape")?,
        }))
    }
}

struct Announce {
    source: String,
    greeting: String,
    print_shape: bool,
}

impl Stage for Announce {
    fn name(&self) -> &str {
        "announce"
    }

    fn verb(&self) -> &str {
        "Announcing"
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
        let t = meta.current_t()?;
        if self.print_shape {
            info!(source = %self.source, t, shape = ?data.shape(), "{}", self.greeting);
        } else {
            info!(source = %self.source, t, "{}", self.greeting);
        }
        Ok(data)
    }
}
