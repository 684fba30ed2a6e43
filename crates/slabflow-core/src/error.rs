use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used by custom stages that bring their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building or running a plan.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Soft failure from the sanity check. Re-run `plan(true)` to proceed anyway.
    #[error("{}", .0.join("\n"))]
    Warning(Vec<String>),

    #[error("Cannot process .../{source_name} due to the following errors:\n\n{}", format_failures(.failures))]
    Instantiation {
        source_name: String,
        failures: Vec<StageFailure>,
    },

    #[error("Plan is not ready; call plan() first")]
    NotReady,

    #[error("SetupError in stage <{stage}> at position {}", .index + 1)]
    Setup {
        stage: String,
        index: usize,
        #[source]
        source: StageError,
    },

    #[error("ProcessError in stage <{stage}> at position {}", .index + 1)]
    Process {
        stage: String,
        index: usize,
        #[source]
        source: StageError,
    },

    #[error("TeardownError in stage <{stage}> at position {}", .index + 1)]
    Teardown {
        stage: String,
        index: usize,
        #[source]
        source: StageError,
    },

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("OTF error: {0}")]
    Otf(#[from] OtfError),

    #[error("Device context error: {0}")]
    Context(#[from] ContextError),
}

impl PlanError {
    /// Stage name and 1-based position for stage-attributable errors.
    pub fn stage(&self) -> Option<(&str, usize)> {
        match self {
            Self::Setup { stage, index, .. }
            | Self::Process { stage, index, .. }
            | Self::Teardown { stage, index, .. } => Some((stage.as_str(), index + 1)),
            _ => None,
        }
    }

    /// 1-based stage position for stage-attributable errors.
    pub fn position(&self) -> Option<usize> {
        self.stage().map(|(_, position)| position)
    }

    /// Messages carried by a sanity warning, if this is one.
    pub fn warnings(&self) -> Option<&[String]> {
        match self {
            Self::Warning(messages) => Some(messages),
            _ => None,
        }
    }
}

/// One stage that could not be constructed during `plan()`.
#[derive(Clone, Debug, PartialEq)]
pub struct StageFailure {
    pub stage: String,
    pub reason: String,
}

fn format_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}:  {}", f.stage, f.reason))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Errors returned by stage construction and stage hooks.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unexpected data shape {shape:?}: {reason}")]
    Shape { shape: Vec<usize>, reason: String },

    #[error("axis '{axis}' not present in {axes}")]
    MissingAxis { axis: char, axes: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Otf(#[from] OtfError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Custom(#[from] BoxError),
}

impl StageError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by data sources while reading parameters or slabs.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid acquisition settings: {0}")]
    Settings(String),

    #[error("Timepoint {index} out of range (total: {total})")]
    TimepointOutOfRange { index: usize, total: usize },

    #[error("Channel {index} out of range (total: {total})")]
    ChannelOutOfRange { index: usize, total: usize },

    #[error("File {} truncated: expected {expected} bytes, got {actual}", .path.display())]
    Truncated {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised while looking up or loading an optical transfer function.
#[derive(Error, Debug)]
pub enum OtfError {
    #[error("OTF directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("No OTF found for wavelength {wavelength} nm in {}", .dir.display())]
    NotFound { wavelength: u32, dir: PathBuf },

    #[error("Invalid OTF file {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while acquiring or using a deconvolution context.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context requires a 3-D volume, got shape {0:?}")]
    Dimensionality(Vec<usize>),

    #[error("Volume shape {actual:?} does not match context shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Otf(#[from] OtfError),

    #[error("Device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, PlanError>;
