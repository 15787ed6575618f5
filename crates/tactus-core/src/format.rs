//! Sample formats and the conversion to and from the canonical `f64` form.
//!
//! Recalls only ever see canonical samples; PCM in any other format is
//! converted once, at the recycling boundary.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundFormat {
    S8,
    #[default]
    S16,
    S24,
    S32,
    S64,
    Float,
    Double,
    Complex,
}

impl SoundFormat {
    pub const ALL: [SoundFormat; 8] = [
        SoundFormat::S8,
        SoundFormat::S16,
        SoundFormat::S24,
        SoundFormat::S32,
        SoundFormat::S64,
        SoundFormat::Float,
        SoundFormat::Double,
        SoundFormat::Complex,
    ];

    /// Storage size of one sample.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SoundFormat::S8 => 1,
            SoundFormat::S16 => 2,
            SoundFormat::S24 | SoundFormat::S32 | SoundFormat::Float => 4,
            SoundFormat::S64 | SoundFormat::Double => 8,
            SoundFormat::Complex => 16,
        }
    }

    /// Largest integer magnitude, `None` for floating formats.
    const fn full_scale(self) -> Option<f64> {
        match self {
            SoundFormat::S8 => Some(i8::MAX as f64),
            SoundFormat::S16 => Some(i16::MAX as f64),
            SoundFormat::S24 => Some(8_388_607.0),
            SoundFormat::S32 => Some(i32::MAX as f64),
            SoundFormat::S64 => Some(i64::MAX as f64),
            _ => None,
        }
    }
}

/// PCM block in its storage format.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmBuffer {
    S8(Vec<i8>),
    S16(Vec<i16>),
    /// 24-bit samples carried in the low bits of an `i32`.
    S24(Vec<i32>),
    S32(Vec<i32>),
    S64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl PcmBuffer {
    /// Silent block of `len` samples.
    pub fn silence(format: SoundFormat, len: usize) -> Self {
        match format {
            SoundFormat::S8 => PcmBuffer::S8(vec![0; len]),
            SoundFormat::S16 => PcmBuffer::S16(vec![0; len]),
            SoundFormat::S24 => PcmBuffer::S24(vec![0; len]),
            SoundFormat::S32 => PcmBuffer::S32(vec![0; len]),
            SoundFormat::S64 => PcmBuffer::S64(vec![0; len]),
            SoundFormat::Float => PcmBuffer::Float(vec![0.0; len]),
            SoundFormat::Double => PcmBuffer::Double(vec![0.0; len]),
            SoundFormat::Complex => PcmBuffer::Complex(vec![Complex64::new(0.0, 0.0); len]),
        }
    }

    pub fn format(&self) -> SoundFormat {
        match self {
            PcmBuffer::S8(_) => SoundFormat::S8,
            PcmBuffer::S16(_) => SoundFormat::S16,
            PcmBuffer::S24(_) => SoundFormat::S24,
            PcmBuffer::S32(_) => SoundFormat::S32,
            PcmBuffer::S64(_) => SoundFormat::S64,
            PcmBuffer::Float(_) => SoundFormat::Float,
            PcmBuffer::Double(_) => SoundFormat::Double,
            PcmBuffer::Complex(_) => SoundFormat::Complex,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PcmBuffer::S8(v) => v.len(),
            PcmBuffer::S16(v) => v.len(),
            PcmBuffer::S24(v) | PcmBuffer::S32(v) => v.len(),
            PcmBuffer::S64(v) => v.len(),
            PcmBuffer::Float(v) => v.len(),
            PcmBuffer::Double(v) => v.len(),
            PcmBuffer::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into canonical samples, appending to `out`.
    pub fn to_canonical_into(&self, out: &mut Vec<f64>) {
        let scale = self.format().full_scale().unwrap_or(1.0);
        match self {
            PcmBuffer::S8(v) => out.extend(v.iter().map(|&s| s as f64 / scale)),
            PcmBuffer::S16(v) => out.extend(v.iter().map(|&s| s as f64 / scale)),
            PcmBuffer::S24(v) | PcmBuffer::S32(v) => out.extend(v.iter().map(|&s| s as f64 / scale)),
            PcmBuffer::S64(v) => out.extend(v.iter().map(|&s| s as f64 / scale)),
            PcmBuffer::Float(v) => out.extend(v.iter().map(|&s| s as f64)),
            PcmBuffer::Double(v) => out.extend_from_slice(v),
            PcmBuffer::Complex(v) => out.extend(v.iter().map(|s| s.re)),
        }
    }

    pub fn to_canonical(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        self.to_canonical_into(&mut out);
        out
    }

    /// Convert canonical samples into `format`. Integer formats clip at full scale.
    pub fn from_canonical(samples: &[f64], format: SoundFormat) -> Self {
        let quantize = |s: f64| -> f64 {
            let scale = format.full_scale().unwrap_or(1.0);
            (s.clamp(-1.0, 1.0) * scale).round()
        };
        match format {
            SoundFormat::S8 => PcmBuffer::S8(samples.iter().map(|&s| quantize(s) as i8).collect()),
            SoundFormat::S16 => {
                PcmBuffer::S16(samples.iter().map(|&s| quantize(s) as i16).collect())
            }
            SoundFormat::S24 => {
                PcmBuffer::S24(samples.iter().map(|&s| quantize(s) as i32).collect())
            }
            SoundFormat::S32 => {
                PcmBuffer::S32(samples.iter().map(|&s| quantize(s) as i32).collect())
            }
            SoundFormat::S64 => {
                PcmBuffer::S64(samples.iter().map(|&s| quantize(s) as i64).collect())
            }
            SoundFormat::Float => PcmBuffer::Float(samples.iter().map(|&s| s as f32).collect()),
            SoundFormat::Double => PcmBuffer::Double(samples.to_vec()),
            SoundFormat::Complex => PcmBuffer::Complex(
                samples.iter().map(|&s| Complex64::new(s, 0.0)).collect(),
            ),
        }
    }

    /// Re-encode into another storage format.
    pub fn convert(&self, format: SoundFormat) -> Self {
        if self.format() == format {
            return self.clone();
        }
        PcmBuffer::from_canonical(&self.to_canonical(), format)
    }
}
