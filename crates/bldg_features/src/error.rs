use std::path::PathBuf;

use thiserror::Error;

use staging::StagingError;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step was run against a table missing one of its inputs.
    #[error("step `{step}` requires column `{column}`, which is not present")]
    Precondition { step: String, column: String },

    /// A step sequence reads a column no earlier step produces.
    #[error("step `{step}` reads `{column}` before any earlier step produces it")]
    Ordering { step: String, column: String },

    /// An external input (3D metrics, source layer) is missing or unreadable.
    #[error("external source {} unavailable: {reason}", path.display())]
    ExternalSource { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Wraps the error of the step at `index` so a caller can resume there.
    #[error("step `{step}` (#{index}) failed: {source}")]
    StepFailed {
        step: String,
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn external(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::ExternalSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Index of the failed step, if this error came out of a pipeline run.
    pub fn failed_step(&self) -> Option<usize> {
        match self {
            PipelineError::StepFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}
