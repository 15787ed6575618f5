//! Centralized error type for the tactus umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] tactus_core::Error),

    #[error("Worker: {0}")]
    Worker(#[from] tactus_thread::WorkerError),

    #[error("Recall: {0}")]
    Recall(#[from] tactus_core::RecallError),

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The target was mid-tic or had live children; retry at the next boundary.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Core(err) => err.is_busy(),
            Error::Worker(tactus_thread::WorkerError::Core(err)) => err.is_busy(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
