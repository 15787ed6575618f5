//! Worker pool, stage barrier, audio loop and task queue for the recall engine.
//!
//! # Primary API
//!
//! - [`AudioLoop`]: applies queued tasks and runs tics
//! - [`WorkerPool`] / [`StageHandle`]: one stage over many units, joined at a barrier
//! - [`TaskQueue`] / [`Task`]: structural mutations applied between tics
//! - [`TicMeter`]: tic duration versus buffer period
//!
//! # Example
//!
//! ```ignore
//! use tactus_thread::*;
//!
//! let mut audio_loop = AudioLoop::new(engine, PoolConfig::default())?;
//! let consumer = audio_loop.output_ring(4096, 2);
//! loop {
//!     let report = audio_loop.run_tic();
//! }
//! ```

pub mod error;
pub use error::{Result, WorkerError};

mod config;
pub use config::PoolConfig;

mod barrier;
pub use barrier::StageBarrier;

mod worker;
pub use worker::{RecyclingThread, WorkerState};

mod pool;
pub use pool::{StageHandle, WorkItem, WorkerPool};

mod task;
pub use task::{Task, TaskKind, TaskOutcome, TaskQueue, TaskTicket};

mod metrics;
pub use metrics::{TicMeter, TicMetrics};

mod audio_loop;
pub use audio_loop::{AudioLoop, TicReport};
