//! Error types.

use tactus_core::{RecallError, Stage, WorkUnit};
use thiserror::Error;

/// Error type for the worker pool and the audio loop.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A unit returned an error from one of its recalls.
    #[error("Unit {unit} failed in {stage:?}: {error}")]
    Failed {
        unit: WorkUnit,
        stage: Stage,
        error: RecallError,
    },

    /// A unit panicked; its worker survived.
    #[error("Unit {unit} panicked in {stage:?}: {message}")]
    Panicked {
        unit: WorkUnit,
        stage: Stage,
        message: String,
    },

    /// A worker thread is gone; its share of the stage never ran.
    #[error("Worker {0} disconnected")]
    Disconnected(usize),

    /// Failed to spawn a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The task queue was shut down before the task ran.
    #[error("Task dropped before it ran")]
    TaskDropped,

    #[error("Invalid pool config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] tactus_core::Error),
}

impl WorkerError {
    /// Unit the error belongs to, if any.
    pub fn unit(&self) -> Option<WorkUnit> {
        match self {
            WorkerError::Failed { unit, .. } | WorkerError::Panicked { unit, .. } => Some(*unit),
            _ => None,
        }
    }

    /// Scope breaches poison the whole context for the rest of the tic.
    pub fn poisons_context(&self) -> bool {
        matches!(
            self,
            WorkerError::Failed {
                error: RecallError::CrossScopeSignal { .. } | RecallError::NotInContext { .. },
                ..
            }
        )
    }
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, WorkerError>;
