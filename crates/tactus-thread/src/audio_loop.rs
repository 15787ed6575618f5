//! Tic driver: applies queued tasks, runs every active context stage by stage
//! on the worker pool, and hands finished PCM to the device ring buffer.

use crate::metrics::TicMeter;
use crate::pool::{WorkItem, WorkerPool};
use crate::task::TaskQueue;
use crate::{PoolConfig, Result, WorkerError};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tactus_core::{
    AudioGraph, ChannelKind, ContextId, EngineContext, Stage, TicInfo, UnitTarget, WorkUnit,
};

/// Outcome of one tic, reported once the tic completed.
#[derive(Debug, Default)]
pub struct TicReport {
    pub tic: u64,
    pub units: usize,
    pub tasks: usize,
    pub failures: Vec<WorkerError>,
    /// Units that stopped early because their context was poisoned.
    pub skipped: Vec<WorkUnit>,
    pub frames: usize,
    /// Frames the device ring buffer had no room for.
    pub dropped_frames: usize,
    pub reaped: usize,
    pub elapsed: Duration,
}

impl TicReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Units that failed at some stage.
    pub fn failed_units(&self) -> Vec<WorkUnit> {
        self.failures.iter().filter_map(WorkerError::unit).collect()
    }
}

/// Drives tics over an [`EngineContext`].
pub struct AudioLoop {
    engine: Arc<EngineContext>,
    pool: WorkerPool,
    tasks: Arc<TaskQueue>,
    meter: Arc<TicMeter>,
    output: Option<HeapProd<f32>>,
    channels: usize,
    mix: Vec<f64>,
    interleaved: Vec<f32>,
    frame_offset: u64,
}

impl AudioLoop {
    pub fn new(engine: Arc<EngineContext>, config: PoolConfig) -> Result<Self> {
        let pool = WorkerPool::new(Arc::clone(&engine), config)?;
        let meter = Arc::new(TicMeter::new(engine.config().tic_period()));
        Ok(Self {
            engine,
            pool,
            tasks: Arc::new(TaskQueue::new()),
            meter,
            output: None,
            channels: 2,
            mix: Vec::new(),
            interleaved: Vec::new(),
            frame_offset: 0,
        })
    }

    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub fn tasks(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.tasks)
    }

    pub fn meter(&self) -> Arc<TicMeter> {
        Arc::clone(&self.meter)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Write interleaved `f32` output with `channels` channels into `producer`.
    pub fn set_output(&mut self, producer: HeapProd<f32>, channels: usize) {
        self.output = Some(producer);
        self.channels = channels.max(1);
    }

    /// Create a device ring buffer holding `frames` interleaved frames and
    /// return its consumer side.
    pub fn output_ring(&mut self, frames: usize, channels: usize) -> HeapCons<f32> {
        let (producer, consumer) = HeapRb::<f32>::new(frames * channels.max(1)).split();
        self.set_output(producer, channels);
        consumer
    }

    /// Start a new tic and list the units to run, parent contexts first.
    pub fn on_tic(&self, frame_offset: u64, note_offset: u32) -> Vec<WorkItem> {
        let tic = TicInfo {
            tic: self.engine.next_tic(),
            frame_offset,
            note_offset,
        };
        let roots = self.engine.active_roots();
        let levels = match self.engine.contexts().resolve_levels(&roots) {
            Ok(levels) => levels,
            Err(err) => {
                tracing::error!(tic = tic.tic, error = %err, "context tree unresolvable, tic skipped");
                return Vec::new();
            }
        };

        let graph = self.engine.graph();
        let mut items = Vec::new();
        for (level, contexts) in levels.iter().enumerate() {
            for context in contexts {
                for unit in self.engine.units(*context) {
                    items.push(WorkItem {
                        unit,
                        level,
                        tic,
                        affinity: self.affinity_of(&graph, unit),
                    });
                }
            }
        }
        items
    }

    fn affinity_of(&self, graph: &AudioGraph, unit: WorkUnit) -> Option<usize> {
        let UnitTarget::Channel(channel) = unit.target else {
            return None;
        };
        let audio = graph.channel(channel)?.audio();
        self.engine.playback(audio)?.playback(channel)?.affinity()
    }

    /// Run one complete tic.
    ///
    /// A unit that fails skips its remaining stages; a scope breach skips the
    /// rest of its context. Other contexts keep running. Errors are logged
    /// after the tic, then completed recalls are reaped.
    pub fn run_tic(&mut self) -> TicReport {
        let start = Instant::now();
        let budget = self.engine.config().task_budget;
        let tasks = self.tasks.drain(&self.engine, budget);

        let mut items = self.on_tic(self.frame_offset, 0);
        let buffer_size = self.engine.config().buffer_size;
        self.frame_offset += buffer_size as u64;
        let tic = items.first().map(|i| i.tic.tic).unwrap_or_else(|| self.engine.tic_count());

        let mut contexts: Vec<ContextId> = items.iter().map(|i| i.unit.context).collect();
        contexts.dedup();
        let audios = self.engine.audios_in(&self.engine.graph(), &contexts);

        let mut failures = Vec::new();
        let mut failed: HashSet<WorkUnit> = HashSet::new();
        let mut poisoned: HashSet<ContextId> = HashSet::new();
        let guard = self.engine.tic_guard(&audios);
        let graph = self.engine.graph();
        // drop units an edit removed between listing and guarding
        let live: HashSet<WorkUnit> = contexts.iter().flat_map(|c| self.engine.units(*c)).collect();
        items.retain(|i| live.contains(&i.unit));
        {
            let depth = items.iter().map(|i| i.level + 1).max().unwrap_or(0);
            for stage in Stage::RUN {
                for level in 0..depth {
                    let batch: Vec<WorkItem> = items
                        .iter()
                        .filter(|i| {
                            i.level == level
                                && !failed.contains(&i.unit)
                                && !poisoned.contains(&i.unit.context)
                        })
                        .copied()
                        .collect();
                    if batch.is_empty() {
                        continue;
                    }
                    for err in self.pool.submit(&batch, stage, Arc::clone(&graph)).wait() {
                        if let Some(unit) = err.unit() {
                            failed.insert(unit);
                            if err.poisons_context() {
                                poisoned.insert(unit.context);
                            }
                        }
                        failures.push(err);
                    }
                }
            }
        }
        drop(guard);

        let skipped: Vec<WorkUnit> = items
            .iter()
            .map(|i| i.unit)
            .filter(|u| poisoned.contains(&u.context) && !failed.contains(u))
            .collect();
        let roots: Vec<ContextId> = items.iter().filter(|i| i.level == 0).map(|i| i.unit.context).collect();
        let (frames, dropped_frames) = self.write_output(&graph, &roots, buffer_size);
        let reaped = self.engine.reap().freed.len();

        for failure in &failures {
            if failure.poisons_context() {
                tracing::error!(tic, error = %failure, "scope breach");
            } else {
                tracing::warn!(tic, error = %failure, "unit failed");
            }
        }
        let elapsed = start.elapsed();
        self.meter.record(elapsed, failures.len());

        TicReport {
            tic,
            units: items.len(),
            tasks,
            failures,
            skipped,
            frames,
            dropped_frames,
            reaped,
            elapsed,
        }
    }

    /// Mix the current buffer of every signal in the toplevel contexts'
    /// output recyclings into the ring buffer.
    fn write_output(&mut self, graph: &AudioGraph, roots: &[ContextId], frames: usize) -> (usize, usize) {
        let Some(output) = self.output.as_mut() else {
            return (0, 0);
        };
        let channels = self.channels;
        self.mix.clear();
        self.mix.resize(frames * channels, 0.0);

        let mut seen = Vec::new();
        for root in roots {
            if seen.contains(root) {
                continue;
            }
            seen.push(*root);
            let Some(ctx) = self.engine.contexts().get(*root) else {
                continue;
            };
            let Some(audio) = ctx
                .recyclings()
                .first()
                .and_then(|r| graph.audio_of_recycling(*r))
                .and_then(|a| graph.audio(a))
            else {
                continue;
            };
            for channel in audio.channels(ChannelKind::Output).iter().filter_map(|c| graph.channel(*c)) {
                let ac = channel.audio_channel();
                if ac >= channels {
                    continue;
                }
                for recycling in channel.recyclings().iter().filter_map(|r| graph.recycling(*r)) {
                    for signal in recycling.find_by_contexts(&[*root]) {
                        let mix = &mut self.mix;
                        recycling.read_signal(signal, |s| {
                            if let Some(buffer) = s.current() {
                                for (frame, sample) in buffer.iter().take(frames).enumerate() {
                                    mix[frame * channels + ac] += sample;
                                }
                            }
                        });
                    }
                }
            }
        }

        self.interleaved.clear();
        self.interleaved.extend(self.mix.iter().map(|s| *s as f32));
        let written = output.push_slice(&self.interleaved);
        let frames_written = written / channels;
        (frames_written, frames - frames_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_core::{AudioSpec, EngineConfig, RecallRegistry, SoundScope};

    fn audio_loop() -> AudioLoop {
        let config = EngineConfig {
            workers: 2,
            realtime: false,
            ..Default::default()
        };
        let engine = Arc::new(EngineContext::new(config.clone(), RecallRegistry::new()));
        AudioLoop::new(engine, PoolConfig::from_engine(&config)).unwrap()
    }

    #[test]
    fn test_idle_tic_advances_counter() {
        let mut audio_loop = audio_loop();
        let report = audio_loop.run_tic();
        assert_eq!(report.units, 0);
        assert!(report.is_clean());
        assert_eq!(audio_loop.engine().tic_count(), 1);
        assert_eq!(audio_loop.meter().metrics().tics, 1);
    }

    #[test]
    fn test_tasks_applied_before_units_collected() {
        let mut audio_loop = audio_loop();
        let engine = Arc::clone(audio_loop.engine());
        let audio = engine.add_audio(AudioSpec::new("synth"));
        let ticket = audio_loop
            .tasks()
            .submit(crate::Task::start_playback(audio, SoundScope::Playback));

        let report = audio_loop.run_tic();
        assert_eq!(report.tasks, 1);
        assert!(ticket.wait().is_ok());
        assert!(engine.playback(audio).unwrap().is_playing(SoundScope::Playback));
    }

    #[test]
    fn test_silence_written_to_ring() {
        let mut audio_loop = audio_loop();
        let mut consumer = audio_loop.output_ring(4096, 2);
        let engine = Arc::clone(audio_loop.engine());
        let audio = engine.add_audio(AudioSpec::new("synth").audio_channels(2));
        engine.start_playback(audio, SoundScope::Playback).unwrap();

        let report = audio_loop.run_tic();
        assert_eq!(report.frames, engine.config().buffer_size);
        assert_eq!(consumer.occupied_len(), engine.config().buffer_size * 2);
        assert!(consumer.try_pop().is_some_and(|s| s == 0.0));
    }
}
