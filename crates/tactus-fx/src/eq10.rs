//! Ten band equalizer over the visible source signals.
//!
//! Each band is a peaking biquad centred on an octave from 28 Hz up to
//! 14336 Hz, run in series. The `peak-<freq>hz` ports hold a linear band gain
//! (1.0 is flat) and `pressure` scales the result.

use crate::error::check_range;
use crate::signal::{signal_target, with_current};
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory,
    RecallParams, RecallResult, RecallTarget, RecyclingRun, RunContext,
};

pub const NAME: &str = "eq10";

/// Centre frequencies of the ten bands.
pub const BANDS: [f64; 10] = [
    28.0, 56.0, 112.0, 224.0, 448.0, 896.0, 1792.0, 3584.0, 7168.0, 14336.0,
];

/// Roughly one octave wide.
const BAND_Q: f64 = 1.41;

/// Lowest band gain in dB; a gain port at 0.0 maps here.
const MIN_GAIN_DB: f64 = -24.0;

/// Port holding the gain of the band centred on `frequency`.
pub fn band_port(frequency: f64) -> String {
    format!("peak-{}hz", frequency as u32)
}

pub struct Eq10Factory;

impl RecallFactory for Eq10Factory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let mut ports = Vec::with_capacity(BANDS.len() + 1);
        for frequency in BANDS {
            let name = band_port(frequency);
            let gain = get_param_or(params, &name, 1.0, ParamValue::as_f64);
            let gain = check_range("band gain", gain, 0.0, 2.0, "0.0..=2.0")?;
            ports.push(Port::float(name, gain).with_range(PortRange::linear(0.0, 2.0, 1.0)));
        }
        let pressure = get_param_or(params, "pressure", 1.0, ParamValue::as_f64);
        let pressure = check_range("pressure", pressure, 0.0, 2.0, "0.0..=2.0")?;
        ports.push(Port::float("pressure", pressure).with_range(PortRange::linear(0.0, 2.0, 1.0)));
        Ok(ports)
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let channel = ChannelRun::new(NAME, |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(Eq10Signal::default()) as Box<dyn Recall>)
            });
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

/// Transposed direct form II biquad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Default for Biquad {
    fn default() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }
}

impl Biquad {
    /// Peaking filter with `gain_db` at `frequency`; the delay line is kept.
    pub fn set_peaking(&mut self, frequency: f64, gain_db: f64, q: f64, samplerate: f64) {
        // stay below nyquist at low samplerates
        let frequency = frequency.min(samplerate * 0.45);
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = std::f64::consts::TAU * frequency / samplerate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = -2.0 * cos / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Linear band gain to dB, floored at [`MIN_GAIN_DB`].
fn gain_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        MIN_GAIN_DB
    } else {
        (20.0 * gain.log10()).max(MIN_GAIN_DB)
    }
}

/// Per-signal filter bank; coefficients follow the band ports.
#[derive(Debug, Clone)]
pub struct Eq10Signal {
    bands: [Biquad; 10],
    gains: [f64; 10],
    samplerate: u32,
}

impl Default for Eq10Signal {
    fn default() -> Self {
        Self {
            bands: [Biquad::default(); 10],
            gains: [f64::NAN; 10],
            samplerate: 0,
        }
    }
}

impl Eq10Signal {
    /// Recompute the bands whose gain or samplerate changed.
    fn tune(&mut self, gains: [f64; 10], samplerate: u32) {
        let resampled = samplerate != self.samplerate;
        for (i, gain) in gains.iter().enumerate() {
            if resampled || self.gains[i] != *gain {
                self.bands[i].set_peaking(BANDS[i], gain_db(*gain), BAND_Q, samplerate as f64);
            }
        }
        if resampled {
            self.bands.iter_mut().for_each(Biquad::reset);
        }
        self.gains = gains;
        self.samplerate = samplerate;
    }

    #[inline]
    fn process(&mut self, sample: f64) -> f64 {
        self.bands.iter_mut().fold(sample, |x, band| band.process(x))
    }
}

impl Recall for Eq10Signal {
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
        let samplerate = cx.read_signal(recycling, signal, |s| s.params().samplerate)?.max(1);
        let mut gains = [1.0; 10];
        for (gain, frequency) in gains.iter_mut().zip(BANDS) {
            *gain = cx.port(&band_port(frequency))?.get();
        }
        let pressure = cx.port("pressure")?.get();
        self.tune(gains, samplerate);

        let mut bank = self.clone();
        with_current(cx, |buffer| {
            for sample in buffer {
                *sample = bank.process(*sample) * pressure;
            }
        })?;
        *self = bank;
        Ok(())
    }
}
