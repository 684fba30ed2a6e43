//! Built-in stage types.

mod announce;
mod background;
mod crop;
mod deconvolution;
mod max_projection;
mod writer;

use std::sync::Arc;

use crate::compute::DeconBackend;
use crate::stage::StageRegistry;

pub use announce::AnnounceFactory;
pub use background::BackgroundFactory;
pub use crop::CropFactory;
pub use deconvolution::DeconvolutionFactory;
pub use max_projection::MaxProjectionFactory;
pub use writer::{OutputFormat, WriterFactory};

/// Registry holding every built-in stage type. `backend` is used by the
/// deconvolution stage when it has to acquire contexts itself.
pub fn builtin_registry(backend: Arc<dyn DeconBackend>) -> StageRegistry {
    StageRegistry::new()
        .with(Arc::new(AnnounceFactory))
        .with(Arc::new(CropFactory))
        .with(Arc::new(BackgroundFactory))
        .with(Arc::new(MaxProjectionFactory))
        .with(Arc::new(DeconvolutionFactory::new(backend)))
        .with(Arc::new(WriterFactory::new(OutputFormat::Tiff)))
        .with(Arc::new(WriterFactory::new(OutputFormat::Raw)))
}
