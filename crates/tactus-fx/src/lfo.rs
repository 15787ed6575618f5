//! Low frequency amplitude modulation of the visible source signals.

use crate::error::{check_range, FxError};
use crate::signal::{signal_target, with_current};
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory,
    RecallParams, RecallResult, RecallTarget, RecyclingRun, RunContext,
};

pub const NAME: &str = "lfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
    SawtoothDown,
    Random,
    RandomSmooth,
}

impl LfoShape {
    /// Value in `-1.0..=1.0` at `phase` in `0.0..1.0`. The random shapes
    /// evaluate through [`RandomState`] instead.
    #[inline]
    pub fn evaluate(&self, phase: f64) -> f64 {
        match self {
            LfoShape::Sine => (phase * std::f64::consts::TAU).sin(),
            LfoShape::Triangle => {
                let p = phase * 4.0;
                if p < 1.0 {
                    p
                } else if p < 3.0 {
                    2.0 - p
                } else {
                    p - 4.0
                }
            }
            LfoShape::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoShape::Sawtooth => phase * 2.0 - 1.0,
            LfoShape::SawtoothDown => 1.0 - phase * 2.0,
            LfoShape::Random | LfoShape::RandomSmooth => 0.0,
        }
    }

    pub fn all() -> &'static [LfoShape] {
        &[
            LfoShape::Sine,
            LfoShape::Triangle,
            LfoShape::Square,
            LfoShape::Sawtooth,
            LfoShape::SawtoothDown,
            LfoShape::Random,
            LfoShape::RandomSmooth,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            LfoShape::Sine => "sine",
            LfoShape::Triangle => "triangle",
            LfoShape::Square => "square",
            LfoShape::Sawtooth => "sawtooth",
            LfoShape::SawtoothDown => "sawtooth-down",
            LfoShape::Random => "random",
            LfoShape::RandomSmooth => "random-smooth",
        }
    }
}

impl std::str::FromStr for LfoShape {
    type Err = FxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LfoShape::all()
            .iter()
            .copied()
            .find(|shape| shape.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FxError::UnknownShape(s.to_string()))
    }
}

/// Sample-and-hold noise, redrawn on every phase wrap.
#[derive(Debug, Clone)]
struct RandomState {
    current: f64,
    previous: f64,
    last_phase: f64,
    seed: u32,
}

impl Default for RandomState {
    fn default() -> Self {
        Self {
            current: 0.0,
            previous: 0.0,
            last_phase: 0.0,
            seed: 12345,
        }
    }
}

impl RandomState {
    fn next(&mut self) -> f64 {
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 17;
        self.seed ^= self.seed << 5;
        (self.seed as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    fn update_for_phase(&mut self, phase: f64) {
        if phase < self.last_phase - 0.5 {
            self.previous = self.current;
            self.current = self.next();
        }
        self.last_phase = phase;
    }

    fn smooth(&self, phase: f64) -> f64 {
        self.previous + (self.current - self.previous) * phase
    }
}

pub struct LfoFactory;

impl RecallFactory for LfoFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let frequency = get_param_or(params, "frequency", 6.0, ParamValue::as_f64);
        let frequency = check_range("frequency", frequency, 0.01, 20.0, "0.01..=20.0 Hz")?;
        let depth = get_param_or(params, "depth", 0.5, ParamValue::as_f64);
        let depth = check_range("depth", depth, 0.0, 1.0, "0.0..=1.0")?;
        Ok(vec![
            Port::float("frequency", frequency).with_range(PortRange::logarithmic(0.01, 20.0, 6.0)),
            Port::float("depth", depth).with_range(PortRange::linear(0.0, 1.0, 0.5)),
            Port::float("phase-offset", 0.0).with_range(PortRange::linear(0.0, 1.0, 0.0)),
        ])
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let shape: LfoShape = match params.get("shape").and_then(ParamValue::as_str) {
            Some(name) => name.parse()?,
            None => LfoShape::default(),
        };
        let channel = ChannelRun::new(NAME, move |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, move |_| {
                Some(Box::new(LfoSignal::new(shape)) as Box<dyn Recall>)
            });
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

/// Per-signal oscillator; each signal keeps its own phase.
#[derive(Debug, Clone)]
pub struct LfoSignal {
    shape: LfoShape,
    phase: f64,
    random: RandomState,
}

impl LfoSignal {
    pub fn new(shape: LfoShape) -> Self {
        Self {
            shape,
            phase: 0.0,
            random: RandomState::default(),
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    #[inline]
    fn value(&mut self, phase_offset: f64) -> f64 {
        let phase = (self.phase + phase_offset).fract();
        match self.shape {
            LfoShape::Random => {
                self.random.update_for_phase(phase);
                self.random.current
            }
            LfoShape::RandomSmooth => {
                self.random.update_for_phase(phase);
                self.random.smooth(phase)
            }
            shape => shape.evaluate(phase),
        }
    }
}

impl Recall for LfoSignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_inter(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some((recycling, signal)) = signal_target(cx) else {
            return Ok(());
        };
        if !cx.recycling(recycling)?.contains_signal(signal) {
            return Ok(());
        }
        let samplerate = cx.read_signal(recycling, signal, |s| s.params().samplerate)?.max(1) as f64;
        let frequency = cx.port("frequency")?.get();
        let depth = cx.port("depth")?.get();
        let phase_offset = cx.port("phase-offset")?.get();
        let increment = frequency / samplerate;

        let mut lfo = self.clone();
        with_current(cx, |buffer| {
            for sample in buffer {
                // map -1..1 onto a gain of 1 - depth..1
                let gain = 1.0 - depth * (1.0 - lfo.value(phase_offset)) * 0.5;
                *sample *= gain;
                lfo.phase += increment;
                if lfo.phase >= 1.0 {
                    lfo.phase -= 1.0;
                }
            }
        })?;
        *self = lfo;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shapes_stay_in_range() {
        for shape in LfoShape::all() {
            for i in 0..100 {
                let v = shape.evaluate(i as f64 / 100.0);
                assert!((-1.0..=1.0).contains(&v), "{shape:?} out of range: {v}");
            }
        }
        assert_relative_eq!(LfoShape::Sine.evaluate(0.25), 1.0, epsilon = 1e-9);
        assert_relative_eq!(LfoShape::Triangle.evaluate(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(LfoShape::SawtoothDown.evaluate(0.0), 1.0);
    }

    #[test]
    fn test_shape_from_name() {
        assert_eq!("Square".parse::<LfoShape>().unwrap(), LfoShape::Square);
        assert_eq!("sawtooth-down".parse::<LfoShape>().unwrap(), LfoShape::SawtoothDown);
        assert!(matches!("wobble".parse::<LfoShape>(), Err(FxError::UnknownShape(_))));
    }

    #[test]
    fn test_random_redraws_on_wrap() {
        let mut lfo = LfoSignal::new(LfoShape::Random);
        lfo.phase = 0.9;
        let before = lfo.value(0.0);
        lfo.phase = 0.1;
        let after = lfo.value(0.0);
        assert_ne!(before, after);
        assert!((-1.0..=1.0).contains(&after));
    }

    #[test]
    fn test_lfo_modulates_stream() {
        use crate::testing::{drum, engine, input_signal, pcm, seed_input, tic};
        use tactus_core::{params, ChannelKind, SoundScope};

        let engine = engine();
        let audio = drum(&engine);
        seed_input(&engine, audio, &pcm(&[1.0; 4]));
        engine.map_recall(audio, crate::stream::NAME, params! {}, ChannelKind::Input, 0, 0).unwrap();
        engine
            .map_recall(
                audio,
                NAME,
                params! { "shape" => "square", "depth" => 1.0 },
                ChannelKind::Input,
                0,
                0,
            )
            .unwrap();
        let context = engine.start_playback(audio, SoundScope::Playback).unwrap();
        tic(&engine, context);

        // phase 0 of a square wave leaves the signal untouched
        let buffer = input_signal(&engine, audio, context, |s| s.current().unwrap().to_vec()).unwrap();
        assert_relative_eq!(buffer[0], 1.0);
    }

    #[test]
    fn test_unknown_shape_rejected_at_mapping() {
        use crate::testing::{drum, engine};
        use tactus_core::{params, ChannelKind};

        let engine = engine();
        let audio = drum(&engine);
        assert!(engine
            .map_recall(audio, NAME, params! { "shape" => "wobble" }, ChannelKind::Input, 0, 0)
            .is_err());
    }
}
