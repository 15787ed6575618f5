//! Bounded worker pool executing one stage at a time.

use crate::barrier::StageBarrier;
use crate::worker::{Assignment, Failures, RecyclingThread, WorkerState};
use crate::{PoolConfig, Result, WorkerError};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tactus_core::{AudioGraph, EngineContext, Stage, TicInfo, WorkUnit};

/// A unit scheduled for one tic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub unit: WorkUnit,
    /// Depth of the unit's context; level 0 runs first.
    pub level: usize,
    pub tic: TicInfo,
    /// Preferred worker.
    pub affinity: Option<usize>,
}

/// Completion handle of a submitted stage.
///
/// Dropping the handle without [`wait`](StageHandle::wait) still joins the
/// barrier, so workers are never left stranded.
#[must_use = "a stage is only complete once its handle has been waited on"]
pub struct StageHandle<'a> {
    barrier: &'a StageBarrier,
    failures: Failures,
    stage: Stage,
    units: usize,
    waited: bool,
}

impl StageHandle<'_> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Block until every worker passed the barrier and return the failures.
    pub fn wait(mut self) -> Vec<WorkerError> {
        self.barrier.wait();
        self.waited = true;
        std::mem::take(&mut *self.failures.lock())
    }
}

impl Drop for StageHandle<'_> {
    fn drop(&mut self) {
        if !self.waited {
            self.barrier.wait();
        }
    }
}

/// Fixed set of [`RecyclingThread`]s sharing one [`StageBarrier`].
pub struct WorkerPool {
    workers: Vec<RecyclingThread>,
    barrier: Arc<StageBarrier>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Spawn `config.workers` threads running units against `engine`.
    pub fn new(engine: Arc<EngineContext>, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let mut worker = RecyclingThread::new(index, config.queue_capacity);
            worker.start(Arc::clone(&engine), &config.name, config.realtime)?;
            workers.push(worker);
        }
        tracing::info!(workers = config.workers, realtime = config.realtime, "worker pool started");
        Ok(Self {
            workers,
            // every worker plus the submitter
            barrier: Arc::new(StageBarrier::new(config.workers + 1)),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(RecyclingThread::state).collect()
    }

    /// Distribute `items` over the workers and start `stage` on all of them.
    ///
    /// Items keep their relative order within a worker. Items with an affinity
    /// go to that worker; the rest fill the least loaded workers.
    pub fn submit(&mut self, items: &[WorkItem], stage: Stage, graph: Arc<AudioGraph>) -> StageHandle<'_> {
        let n = self.workers.len();
        let mut shares: Vec<SmallVec<[WorkUnit; 8]>> = vec![SmallVec::new(); n];
        for item in items.iter().filter(|i| i.affinity.is_some()) {
            if let Some(worker) = item.affinity {
                shares[worker % n].push(item.unit);
            }
        }
        for item in items.iter().filter(|i| i.affinity.is_none()) {
            let lightest = (0..n).min_by_key(|w| shares[*w].len()).unwrap_or(0);
            shares[lightest].push(item.unit);
        }

        let tic = items.first().map(|i| i.tic).unwrap_or_default();
        let failures: Failures = Arc::new(Mutex::new(Vec::new()));
        for (worker, units) in self.workers.iter().zip(shares) {
            let assignment = Assignment {
                stage,
                tic,
                graph: Arc::clone(&graph),
                units,
                barrier: Arc::clone(&self.barrier),
                failures: Arc::clone(&failures),
            };
            if let Err(lost) = worker.assign(assignment) {
                tracing::warn!(worker = worker.index(), units = lost.units.len(), "worker disconnected");
                failures.lock().push(WorkerError::Disconnected(worker.index()));
                lost.barrier.arrive();
            }
        }

        StageHandle {
            barrier: &self.barrier,
            failures,
            stage,
            units: items.len(),
            waited: false,
        }
    }

    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_core::{
        AudioSpec, ChannelKind, EngineConfig, PortSet, Recall, RecallRegistry, RecallTarget,
        RunContext, RecallResult, SoundScope, UnitTarget,
    };

    #[derive(Clone)]
    struct Fails;

    impl Recall for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        fn run_pre(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
            Err(tactus_core::RecallError::Failed("boom".into()))
        }
    }

    #[derive(Clone)]
    struct Panics;

    impl Recall for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn run_pre(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
            panic!("recall exploded");
        }
    }

    fn pool(workers: usize) -> (Arc<EngineContext>, WorkerPool) {
        let engine = Arc::new(EngineContext::new(EngineConfig::default(), RecallRegistry::new()));
        let config = PoolConfig {
            workers,
            realtime: false,
            ..Default::default()
        };
        let pool = WorkerPool::new(Arc::clone(&engine), config).unwrap();
        (engine, pool)
    }

    #[test]
    fn test_empty_stage_releases() {
        let (engine, mut pool) = pool(3);
        let failures = pool.submit(&[], Stage::Pre, engine.graph()).wait();
        assert!(failures.is_empty());
        assert_eq!(pool.states().len(), 3);
    }

    #[test]
    fn test_failures_and_panics_are_reported() {
        let (engine, mut pool) = pool(2);
        let audio = engine.add_audio(AudioSpec::new("synth").audio_channels(2));
        let graph = engine.graph();
        let channels = graph.audio(audio).unwrap().channels(ChannelKind::Output).to_vec();
        engine
            .add_template(Box::new(Fails), RecallTarget::channel(channels[0]), PortSet::empty(), Default::default())
            .unwrap();
        engine
            .add_template(Box::new(Panics), RecallTarget::channel(channels[1]), PortSet::empty(), Default::default())
            .unwrap();
        let context = engine.start_playback(audio, SoundScope::Playback).unwrap();

        let items: Vec<WorkItem> = engine
            .units(context)
            .into_iter()
            .map(|unit| WorkItem {
                unit,
                level: 0,
                tic: TicInfo::default(),
                affinity: None,
            })
            .collect();
        assert_eq!(items.len(), 2);

        let failures = pool.submit(&items, Stage::Pre, engine.graph()).wait();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| matches!(f, WorkerError::Failed { .. })));
        assert!(failures
            .iter()
            .any(|f| matches!(f, WorkerError::Panicked { message, .. } if message.contains("exploded"))));
        assert!(failures
            .iter()
            .all(|f| matches!(f.unit().map(|u| u.target), Some(UnitTarget::Channel(_)))));

        // the pool keeps working after a panic
        assert!(pool.submit(&[], Stage::Inter, engine.graph()).wait().is_empty());
    }

    #[test]
    fn test_affinity_pins_units() {
        let (engine, mut pool) = pool(2);
        let unit = WorkUnit {
            context: tactus_core::ContextId::next(),
            target: UnitTarget::Audio(tactus_core::AudioId::next()),
        };
        let items = [WorkItem {
            unit,
            level: 0,
            tic: TicInfo::default(),
            affinity: Some(5),
        }];
        // unknown context: the unit fails on worker 1 without blocking the stage
        let failures = pool.submit(&items, Stage::Pre, engine.graph()).wait();
        assert_eq!(failures.len(), 1);
    }
}
