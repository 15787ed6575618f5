//! Count-beats: an audio-level beat counter, one counter port per sound scope.
//!
//! Every tic adds one buffer of frames; each full beat at the current `bpm`
//! advances the counter of the context's scope. With `loop` set the counter
//! wraps from `loop-end` back to `loop-start`.

use crate::error::check_range;
use std::sync::Arc;
use tactus_core::{
    get_param_or, AudioId, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory, RecallParams,
    RecallResult, RunContext, SoundScope,
};

pub const NAME: &str = "count-beats";

/// Port holding the beat counter of `scope`.
pub fn counter_port(scope: SoundScope) -> String {
    format!("{}-counter", scope.name())
}

pub struct CountBeatsFactory;

impl RecallFactory for CountBeatsFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let bpm = get_param_or(params, "bpm", 120.0, ParamValue::as_f64);
        let bpm = check_range("bpm", bpm, 1.0, 999.0, "1..=999 bpm")?;
        let looping = get_param_or(params, "loop", false, ParamValue::as_bool);
        let loop_start = get_param_or(params, "loop-start", 0, ParamValue::as_i64);
        let loop_end = get_param_or(params, "loop-end", 16, ParamValue::as_i64);

        let mut ports = vec![
            Port::float("bpm", bpm).with_range(PortRange::linear(1.0, 999.0, 120.0)),
            Port::bool("loop", looping),
            Port::int("loop-start", loop_start),
            Port::int("loop-end", loop_end),
        ];
        ports.extend(SoundScope::ALL.iter().map(|scope| Port::int(counter_port(*scope), 0)));
        Ok(ports)
    }

    fn audio_recall(
        &self,
        audio: AudioId,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(CountBeats::new(audio))))
    }
}

#[derive(Debug, Clone)]
pub struct CountBeats {
    audio: AudioId,
    /// Frames into the current beat.
    frames: f64,
}

impl CountBeats {
    pub fn new(audio: AudioId) -> Self {
        Self { audio, frames: 0.0 }
    }
}

impl Recall for CountBeats {
    fn name(&self) -> &str {
        NAME
    }

    fn run_init(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        self.frames = 0.0;
        cx.port(&counter_port(cx.sound_scope()))?.set(0.0);
        Ok(())
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some(params) = cx.graph().audio(self.audio).map(|a| a.params()) else {
            return Ok(());
        };
        let bpm = cx.port("bpm")?.get().max(1.0);
        let frames_per_beat = params.samplerate as f64 * 60.0 / bpm;
        let looping = cx.port("loop")?.get_bool();
        let loop_start = cx.port("loop-start")?.get().round() as i64;
        let loop_end = cx.port("loop-end")?.get().round() as i64;
        let counter = cx.port(&counter_port(cx.sound_scope()))?;

        self.frames += params.buffer_size as f64;
        while self.frames >= frames_per_beat {
            self.frames -= frames_per_beat;
            let mut beat = counter.get().round() as i64 + 1;
            if looping && loop_end > loop_start && beat >= loop_end {
                beat = loop_start;
            }
            counter.set(beat as f64);
            tracing::trace!(audio = %self.audio, scope = cx.sound_scope().name(), beat, "beat");
        }
        Ok(())
    }
}
