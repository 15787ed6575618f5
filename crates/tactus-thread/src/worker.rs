//! Recycling worker thread.

use crate::barrier::StageBarrier;
use crate::{Result, WorkerError};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tactus_core::{recall, AudioGraph, EngineContext, Stage, TicInfo, WorkUnit};
use thread_priority::ThreadPriority;

/// Lifecycle of a worker within one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WorkerState {
    #[default]
    Idle = 0,
    Assigned = 1,
    Running = 2,
    Waiting = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Assigned,
            2 => WorkerState::Running,
            3 => WorkerState::Waiting,
            _ => WorkerState::Idle,
        }
    }
}

pub(crate) type Failures = Arc<Mutex<Vec<WorkerError>>>;

/// One worker's share of a stage. Empty when the worker has nothing to run;
/// it still passes the barrier.
pub(crate) struct Assignment {
    pub stage: Stage,
    pub tic: TicInfo,
    pub graph: Arc<AudioGraph>,
    pub units: SmallVec<[WorkUnit; 8]>,
    pub barrier: Arc<StageBarrier>,
    pub failures: Failures,
}

pub(crate) enum WorkerCommand {
    Run(Assignment),
    Shutdown,
}

/// Worker thread running units of a stage, then waiting at the barrier.
pub struct RecyclingThread {
    index: usize,
    command_tx: Sender<WorkerCommand>,
    command_rx: Option<Receiver<WorkerCommand>>,
    thread_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl RecyclingThread {
    pub fn new(index: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = bounded(queue_capacity);
        Self {
            index,
            command_tx: tx,
            command_rx: Some(rx),
            thread_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    pub fn start(&mut self, engine: Arc<EngineContext>, name: &str, realtime: bool) -> Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        let Some(rx) = self.command_rx.take() else {
            return Ok(());
        };
        let shutdown = Arc::clone(&self.shutdown);
        let state = Arc::clone(&self.state);
        let index = self.index;

        let handle = thread::Builder::new()
            .name(format!("{name}-{index}"))
            .spawn(move || {
                if realtime {
                    let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                }
                worker_loop(index, rx, engine, shutdown, state);
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Hand an assignment to the worker. On failure the assignment is
    /// returned so the caller can release its barrier slot.
    pub(crate) fn assign(&self, assignment: Assignment) -> core::result::Result<(), Assignment> {
        self.state.store(WorkerState::Assigned as u8, Ordering::Release);
        match self.command_tx.send(WorkerCommand::Run(assignment)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state.store(WorkerState::Idle as u8, Ordering::Release);
                match err.into_inner() {
                    WorkerCommand::Run(assignment) => Err(assignment),
                    WorkerCommand::Shutdown => Ok(()),
                }
            }
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(WorkerCommand::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RecyclingThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    index: usize,
    rx: Receiver<WorkerCommand>,
    engine: Arc<EngineContext>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
) {
    tracing::debug!(worker = index, "worker started");
    while !shutdown.load(Ordering::Acquire) {
        let assignment = match rx.recv() {
            Ok(WorkerCommand::Run(assignment)) => assignment,
            Ok(WorkerCommand::Shutdown) | Err(_) => break,
        };

        state.store(WorkerState::Running as u8, Ordering::Release);
        let env = engine.run_env(&assignment.graph, assignment.tic);
        for unit in &assignment.units {
            if let Some(err) = run_guarded(&env, *unit, assignment.stage) {
                assignment.failures.lock().push(err);
            }
        }

        state.store(WorkerState::Waiting as u8, Ordering::Release);
        assignment.barrier.wait();
        state.store(WorkerState::Idle as u8, Ordering::Release);
    }
    tracing::debug!(worker = index, "worker stopped");
}

/// Run one unit, turning errors and panics into a [`WorkerError`].
pub(crate) fn run_guarded(env: &recall::RunEnv<'_>, unit: WorkUnit, stage: Stage) -> Option<WorkerError> {
    match catch_unwind(AssertUnwindSafe(|| recall::run_unit(env, unit, stage))) {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(WorkerError::Failed { unit, stage, error }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Some(WorkerError::Panicked {
                unit,
                stage,
                message,
            })
        }
    }
}
