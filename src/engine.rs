//! TactusEngine: the recall engine, its worker pool and the tic driver.

use crate::{Error, Result};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use ringbuf::HeapCons;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tactus_core::{
    AudioGraph, AudioId, AudioSpec, ChannelId, ChannelKind, ContainerId, ContextId, EngineConfig,
    EngineContext, IsolationViolation, PortValue, RecallKey, RecallParams, RecallRegistry, ResizeReport,
    SoundScope,
};
use tactus_thread::{AudioLoop, PoolConfig, Task, TaskQueue, TaskTicket, TicMeter, TicMetrics, TicReport};

/// Background thread firing one tic per buffer period.
struct Driver {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Main engine: owns the recall graph, the worker pool and the device ring.
///
/// Structural calls (`map_recall`, resizing, playback) apply immediately and
/// fail with a busy error while a tic touches the audio. While the driver
/// runs, prefer [`submit`](Self::submit): tasks are applied between tics.
///
/// # Example
///
/// ```ignore
/// use tactus::prelude::*;
///
/// let engine = TactusEngine::builder().workers(2).build()?;
/// let drum = engine.add_audio(AudioSpec::new("drum").audio_channels(2));
/// engine.map_recall(drum, "stream", params! {}, ChannelKind::Input, 0, 0)?;
/// engine.map_recall(drum, "copy", params! {}, ChannelKind::Input, 0, 0)?;
/// engine.start_playback(drum, SoundScope::Playback)?;
///
/// let report = engine.tic();
/// assert!(report.is_clean());
/// ```
pub struct TactusEngine {
    context: Arc<EngineContext>,
    audio_loop: Arc<Mutex<AudioLoop>>,
    tasks: Arc<TaskQueue>,
    meter: Arc<TicMeter>,
    output: Mutex<Option<HeapCons<f32>>>,
    outputs: usize,
    driver: Mutex<Option<Driver>>,
}

impl TactusEngine {
    /// Create a new engine builder
    pub fn builder() -> crate::TactusEngineBuilder {
        crate::TactusEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        config: EngineConfig,
        registry: RecallRegistry,
        pool: PoolConfig,
        ring_frames: usize,
        outputs: usize,
    ) -> Result<Self> {
        let context = Arc::new(EngineContext::new(config, registry));
        let mut audio_loop = AudioLoop::new(Arc::clone(&context), pool)?;
        let consumer = audio_loop.output_ring(ring_frames, outputs);
        let tasks = audio_loop.tasks();
        let meter = audio_loop.meter();
        tracing::info!(
            samplerate = context.config().samplerate,
            buffer_size = context.config().buffer_size,
            outputs,
            "engine ready"
        );
        Ok(Self {
            context,
            audio_loop: Arc::new(Mutex::new(audio_loop)),
            tasks,
            meter,
            output: Mutex::new(Some(consumer)),
            outputs: outputs.max(1),
            driver: Mutex::new(None),
        })
    }

    /// Shared engine state, for direct access from recall code and tests.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        self.context.config()
    }

    pub fn registry(&self) -> &RecallRegistry {
        self.context.registry()
    }

    /// Current graph snapshot.
    pub fn graph(&self) -> Arc<AudioGraph> {
        self.context.graph()
    }

    /// Number of interleaved output channels.
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Take the consumer side of the device ring. Returns `None` after the
    /// first call.
    pub fn take_output(&self) -> Option<HeapCons<f32>> {
        self.output.lock().take()
    }

    pub fn metrics(&self) -> TicMetrics {
        self.meter.metrics()
    }

    pub fn meter(&self) -> &Arc<TicMeter> {
        &self.meter
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    /// Queue a structural task for the next tic boundary.
    pub fn submit(&self, task: Task) -> TaskTicket {
        self.tasks.submit(task)
    }

    // =========================================================================
    // Graph
    // =========================================================================

    pub fn add_audio(&self, spec: AudioSpec) -> AudioId {
        self.context.add_audio(spec)
    }

    pub fn remove_audio(&self, audio: AudioId) -> Result<()> {
        Ok(self.context.remove_audio(audio)?)
    }

    pub fn link(&self, input: ChannelId, output: ChannelId) -> Result<()> {
        Ok(self.context.link(input, output)?)
    }

    pub fn unlink(&self, channel: ChannelId) -> Result<()> {
        Ok(self.context.unlink(channel)?)
    }

    pub fn resize_audio_channels(&self, audio: AudioId, new_count: usize, old_count: usize) -> Result<ResizeReport> {
        Ok(self.context.resize_audio_channels(audio, new_count, old_count)?)
    }

    pub fn resize_pads(
        &self,
        audio: AudioId,
        kind: ChannelKind,
        new_count: usize,
        old_count: usize,
    ) -> Result<ResizeReport> {
        Ok(self.context.resize_pads(audio, kind, new_count, old_count)?)
    }

    // =========================================================================
    // Recalls
    // =========================================================================

    /// Map a registered recall family onto `audio`.
    ///
    /// # Example
    /// ```ignore
    /// let volume = engine.map_recall(drum, "volume", params! { "volume" => 0.5 }, ChannelKind::Input, 0, 0)?;
    /// engine.write_port(volume, "volume", PortValue::Float(0.8))?;
    /// ```
    pub fn map_recall(
        &self,
        audio: AudioId,
        name: &str,
        params: RecallParams,
        kind: ChannelKind,
        audio_channel_start: usize,
        pad_start: usize,
    ) -> Result<ContainerId> {
        Ok(self
            .context
            .map_recall(audio, name, params, kind, audio_channel_start, pad_start)?)
    }

    pub fn cancel_recall(&self, recall: RecallKey) -> Result<()> {
        Ok(self.context.cancel_recall(recall)?)
    }

    pub fn write_port(&self, container: ContainerId, port: &str, value: PortValue) -> Result<()> {
        Ok(self.context.write_port(container, port, value)?)
    }

    pub fn read_port(&self, container: ContainerId, port: &str) -> Result<PortValue> {
        Ok(self.context.read_port(container, port)?)
    }

    // =========================================================================
    // Playback
    // =========================================================================

    pub fn start_playback(&self, audio: AudioId, scope: SoundScope) -> Result<ContextId> {
        Ok(self.context.start_playback(audio, scope)?)
    }

    pub fn stop_playback(&self, audio: AudioId, scope: SoundScope) -> Result<()> {
        Ok(self.context.stop_playback(audio, scope)?)
    }

    pub fn is_done(&self, context: ContextId) -> bool {
        self.context.is_done(context)
    }

    /// Signals tagged with a context that does not list their recycling.
    pub fn check_isolation(&self) -> Vec<IsolationViolation> {
        self.context.check_isolation()
    }

    // =========================================================================
    // Tics
    // =========================================================================

    /// Run one tic on the calling thread.
    pub fn tic(&self) -> TicReport {
        self.audio_loop.lock().run_tic()
    }

    /// Run `count` tics back to back and return their reports.
    pub fn run_tics(&self, count: usize) -> Vec<TicReport> {
        let mut audio_loop = self.audio_loop.lock();
        (0..count).map(|_| audio_loop.run_tic()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Start the driver thread, firing a tic every buffer period.
    pub fn start(&self) -> Result<()> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let period = Duration::from_secs_f64(self.config().tic_period());
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let audio_loop = Arc::clone(&self.audio_loop);
        let handle = thread::Builder::new()
            .name("tactus-audio".into())
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let report = audio_loop.lock().run_tic();
                            if !report.is_clean() {
                                tracing::debug!(tic = report.tic, failures = report.failures.len(), "tic had failures");
                            }
                        }
                    }
                }
                tracing::debug!("driver stopped");
            })?;

        *driver = Some(Driver { shutdown_tx, handle });
        tracing::info!(period_us = period.as_micros() as u64, "driver started");
        Ok(())
    }

    /// Stop the driver thread after its current tic.
    pub fn stop(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        let _ = driver.shutdown_tx.send(());
        let _ = driver.handle.join();
    }
}

impl Drop for TactusEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for TactusEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TactusEngine")
            .field("context", &self.context)
            .field("outputs", &self.outputs)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TactusEngine {
        TactusEngine::builder().workers(2).realtime(false).build().unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.outputs(), 2);
        assert!(!engine.is_running());
        assert!(engine.take_output().is_some());
        assert!(engine.take_output().is_none());
    }

    #[test]
    fn test_manual_tics_advance_meter() {
        let engine = engine();
        let reports = engine.run_tics(3);
        assert_eq!(reports.len(), 3);
        assert_eq!(engine.metrics().tics, 3);
        assert_eq!(engine.context().tic_count(), 3);
    }

    #[test]
    fn test_driver_start_stop() {
        let engine = engine();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(Error::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(60));
        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.metrics().tics > 0);
    }
}
