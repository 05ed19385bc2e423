//! Dispatcher error types.

use std::path::PathBuf;

use batchgrid_core::{CoreError, OriginalId};
use thiserror::Error;

/// Errors surfaced to the caller of a dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to materialize {path}: {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scheduler command failed: {0}")]
    Command(String),

    #[error("all submitted jobs of '{name}' failed; not resubmitting, check the worker program")]
    AllJobsFailed { name: String },

    #[error("'{name}' still missing {} task(s) after {rounds} round(s): {missing:?}", .missing.len())]
    MissingTasks {
        name: String,
        rounds: u32,
        missing: Vec<OriginalId>,
    },

    #[error("job folder {0} does not exist, nothing to resume")]
    ResumeFolderMissing(PathBuf),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub(crate) fn materialize(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Materialize {
            path: path.into(),
            source,
        }
    }

    /// Original ids that could not be completed, if this error carries them.
    pub fn missing_ids(&self) -> Option<&[OriginalId]> {
        match self {
            Self::MissingTasks { missing, .. } => Some(missing),
            _ => None,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
