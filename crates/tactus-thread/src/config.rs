//! Worker pool configuration.

use crate::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use tactus_core::EngineConfig;

/// Configuration for [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    /// Raise worker threads to maximum priority.
    pub realtime: bool,
    /// Assignments queued per worker.
    pub queue_capacity: usize,
    /// Thread name prefix; workers are named `{prefix}-{index}`.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            realtime: true,
            queue_capacity: 4,
            name: "tactus-worker".into(),
        }
    }
}

impl PoolConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            workers: config.worker_count(),
            realtime: config.realtime,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WorkerError::InvalidConfig("at least one worker required".into()));
        }
        if self.queue_capacity == 0 {
            return Err(WorkerError::InvalidConfig("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
