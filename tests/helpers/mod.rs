//! Test helpers and fixtures for tactus integration tests
//!
//! Engines built here never touch an audio device: tics are driven by hand
//! through `TactusEngine::tic` unless a test starts the driver itself.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tactus::core::{PortSet, RecallRegistry, UnitTarget};
use tactus::prelude::*;
use tactus::{ChannelId, PcmBuffer, RecallError, RecallKey, Stage};

/// Small buffers keep the tests quick and the numbers readable.
pub const TEST_BUFFER_SIZE: usize = 8;

pub const TEST_SAMPLE_RATE: u32 = 48000;

/// Tolerance for exact gain operations.
pub const FLOAT_EPSILON: f64 = 1e-9;

/// Create a test engine with two non-realtime workers and the stock recalls.
pub fn test_engine() -> TactusEngine {
    test_engine_with(RecallRegistry::new())
}

/// Send engine warnings to the test harness output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .try_init();
}

/// Like [`test_engine`], with extra families registered in `registry`.
pub fn test_engine_with(registry: RecallRegistry) -> TactusEngine {
    init_tracing();
    TactusEngine::builder()
        .samplerate(TEST_SAMPLE_RATE)
        .buffer_size(TEST_BUFFER_SIZE)
        .workers(2)
        .realtime(false)
        .registry(registry)
        .build()
        .expect("Failed to create test engine")
}

/// Audio with `channels` audio channels, one output and one input pad.
pub fn drum(engine: &TactusEngine, channels: usize) -> AudioId {
    engine.add_audio(AudioSpec::new("drum").audio_channels(channels))
}

/// Drum feeding a mixer; the mixer's inputs borrow the drum's output
/// recyclings. Returns `(drum, mixer)`.
pub fn chained(engine: &TactusEngine, channels: usize) -> (AudioId, AudioId) {
    let drum = drum(engine, channels);
    let mixer = engine.add_audio(
        AudioSpec::new("mixer")
            .audio_channels(channels)
            .input_has_recycling(false),
    );
    let graph = engine.graph();
    for ac in 0..channels {
        let input = graph.channel_at(mixer, ChannelKind::Input, 0, ac).unwrap().id();
        let output = graph.channel_at(drum, ChannelKind::Output, 0, ac).unwrap().id();
        engine.link(input, output).unwrap();
    }
    (drum, mixer)
}

pub fn channel(engine: &TactusEngine, audio: AudioId, kind: ChannelKind, ac: usize) -> ChannelId {
    engine.graph().channel_at(audio, kind, 0, ac).unwrap().id()
}

/// Load `samples` into the template of input `ac`.
pub fn seed_input(engine: &TactusEngine, audio: AudioId, ac: usize, samples: &[f64]) {
    let graph = engine.graph();
    let input = graph.channel_at(audio, ChannelKind::Input, 0, ac).unwrap();
    let recycling = graph.recycling(input.recyclings()[0]).unwrap();
    recycling.import_pcm(&PcmBuffer::Double(samples.to_vec()));
}

/// Constant signal `buffers` buffers long.
pub fn constant(value: f64, buffers: usize) -> Vec<f64> {
    vec![value; buffers * TEST_BUFFER_SIZE]
}

/// Templates created by mapping `container`.
pub fn templates(engine: &TactusEngine, container: ContainerId) -> Vec<RecallKey> {
    engine
        .context()
        .containers()
        .get(container)
        .map(|c| c.templates().to_vec())
        .unwrap_or_default()
}

/// Root instances of `channel` in `context`.
pub fn channel_roots(engine: &TactusEngine, context: ContextId, channel: ChannelId) -> Vec<RecallKey> {
    engine
        .context()
        .recalls()
        .roots_for_unit(context, UnitTarget::Channel(channel))
}

/// Drain interleaved samples from the device ring.
pub fn drain(consumer: &mut ringbuf::HeapCons<f32>) -> Vec<f32> {
    use ringbuf::traits::Consumer;
    let mut out = Vec::new();
    while let Some(sample) = consumer.try_pop() {
        out.push(sample);
    }
    out
}

/// Peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

// ---------------------------------------------------------------------------
// Stage-recording families
// ---------------------------------------------------------------------------

/// One recorded stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCall {
    pub seq: u64,
    pub context: ContextId,
    pub stage: Stage,
}

#[derive(Clone, Default)]
pub struct StageLog {
    calls: Arc<Mutex<Vec<StageCall>>>,
    seq: Arc<AtomicU64>,
}

impl StageLog {
    fn record(&self, context: ContextId, stage: Stage) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(StageCall { seq, context, stage });
    }

    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Channel recall recording every stage it runs, registered as `"recorder"`.
#[derive(Clone)]
pub struct Recorder {
    log: StageLog,
}

impl Recall for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        self.log.record(cx.context().id(), Stage::Pre);
        Ok(())
    }

    fn run_inter(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        self.log.record(cx.context().id(), Stage::Inter);
        Ok(())
    }

    fn run_post(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        self.log.record(cx.context().id(), Stage::Post);
        Ok(())
    }
}

pub struct RecorderFactory(pub StageLog);

impl RecallFactory for RecorderFactory {
    fn name(&self) -> &str {
        "recorder"
    }

    fn ports(&self, _params: &RecallParams) -> RecallResult<Vec<tactus::Port>> {
        Ok(Vec::new())
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(Recorder { log: self.0.clone() })))
    }
}

/// Channel recall failing in `run_inter`, registered as `"faulty"`.
#[derive(Clone)]
pub struct Faulty;

impl Recall for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    fn run_inter(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
        Err(RecallError::Failed("faulty recall".into()))
    }
}

pub struct FaultyFactory;

impl RecallFactory for FaultyFactory {
    fn name(&self) -> &str {
        "faulty"
    }

    fn ports(&self, _params: &RecallParams) -> RecallResult<Vec<tactus::Port>> {
        Ok(Vec::new())
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(Faulty)))
    }
}

/// Channel recall that reads a signal belonging to some other context,
/// registered as `"snoop"`.
#[derive(Clone)]
pub struct Snoop;

impl Recall for Snoop {
    fn name(&self) -> &str {
        "snoop"
    }

    fn run_inter(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let own = cx.context().id();
        let foreign = cx.graph().audios().find_map(|audio| {
            cx.graph().recyclings_of(audio.id()).into_iter().find_map(|r| {
                let recycling = cx.graph().recycling(r)?;
                recycling
                    .signal_tags()
                    .into_iter()
                    .find(|(_, tag)| tag.is_some_and(|t| t != own))
                    .map(|(signal, _)| (r, signal))
            })
        });
        if let Some((recycling, signal)) = foreign {
            cx.read_signal(recycling, signal, |_| ())?;
        }
        Ok(())
    }
}

pub struct SnoopFactory;

impl RecallFactory for SnoopFactory {
    fn name(&self) -> &str {
        "snoop"
    }

    fn ports(&self, _params: &RecallParams) -> RecallResult<Vec<tactus::Port>> {
        Ok(Vec::new())
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(Snoop)))
    }
}

/// Registry with the stage-recording families; stock recalls are added by the builder.
pub fn stage_registry(log: &StageLog) -> RecallRegistry {
    let registry = RecallRegistry::new();
    registry.register(RecorderFactory(log.clone()));
    registry.register(FaultyFactory);
    registry.register(SnoopFactory);
    registry
}
