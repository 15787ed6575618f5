//! Envelope: attack, decay, sustain and release over each visible source signal.
//!
//! Times are in seconds from the first buffer the signal is seen. The release
//! starts `length` seconds in; afterwards the signal is silent.

use crate::error::check_range;
use crate::signal::{signal_target, with_current};
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory,
    RecallParams, RecallResult, RecallTarget, RecyclingRun, RunContext,
};

pub const NAME: &str = "envelope";

pub struct EnvelopeFactory;

impl RecallFactory for EnvelopeFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let time = |name: &'static str, default: f64| -> RecallResult<Port> {
            let value = get_param_or(params, name, default, ParamValue::as_f64);
            let value = check_range(name, value, 0.0, 10.0, "0.0..=10.0 s")?;
            Ok(Port::float(name, value).with_range(PortRange::linear(0.0, 10.0, default)))
        };
        let sustain = get_param_or(params, "sustain", 0.7, ParamValue::as_f64);
        let sustain = check_range("sustain", sustain, 0.0, 1.0, "0.0..=1.0")?;
        let length = get_param_or(params, "length", 1.0, ParamValue::as_f64);
        let length = check_range("length", length, 0.0, 60.0, "0.0..=60.0 s")?;
        Ok(vec![
            time("attack", 0.01)?,
            time("decay", 0.1)?,
            Port::float("sustain", sustain).with_range(PortRange::linear(0.0, 1.0, 0.7)),
            time("release", 0.2)?,
            Port::float("length", length).with_range(PortRange::linear(0.0, 60.0, 1.0)),
        ])
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let channel = ChannelRun::new(NAME, |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(EnvelopeSignal::default()) as Box<dyn Recall>)
            });
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

/// Envelope shape read from the ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    /// Start of the release.
    pub length: f64,
}

impl Adsr {
    fn from_ports(cx: &RunContext<'_>) -> RecallResult<Self> {
        Ok(Self {
            attack: cx.port("attack")?.get(),
            decay: cx.port("decay")?.get(),
            sustain: cx.port("sustain")?.get(),
            release: cx.port("release")?.get(),
            length: cx.port("length")?.get(),
        })
    }

    /// Gain `t` seconds in, before any release.
    fn held(&self, t: f64) -> f64 {
        if t < self.attack {
            return t / self.attack;
        }
        let t = t - self.attack;
        if t < self.decay {
            return 1.0 + (self.sustain - 1.0) * t / self.decay;
        }
        self.sustain
    }

    /// Gain `t` seconds in.
    pub fn level(&self, t: f64) -> f64 {
        if t < self.length {
            return self.held(t);
        }
        let t = t - self.length;
        if t < self.release {
            self.held(self.length) * (1.0 - t / self.release)
        } else {
            0.0
        }
    }

    /// `true` once the release has completed at `t`.
    pub fn is_finished(&self, t: f64) -> bool {
        t >= self.length + self.release
    }
}

/// Per-signal position in the envelope.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeSignal {
    frames: u64,
}

impl EnvelopeSignal {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Recall for EnvelopeSignal {
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
        let adsr = Adsr::from_ports(cx)?;

        let mut frames = self.frames;
        with_current(cx, |buffer| {
            for sample in buffer {
                *sample *= adsr.level(frames as f64 / samplerate);
                frames += 1;
            }
        })?;
        self.frames = frames;
        if adsr.is_finished(frames as f64 / samplerate) {
            tracing::trace!(recall = %cx.key(), frames, "envelope released");
        }
        Ok(())
    }
}
