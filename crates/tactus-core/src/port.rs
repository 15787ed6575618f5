//! Control ports: the one piece of state shared between the control side and
//! the tic.
//!
//! Scalars live in an atomic; arrays are published copy-on-write so a reader
//! always sees a complete array. Every port is enumerable through its
//! [`PortSet`] and can be snapshotted between tics.

use crate::error::PortError;
use crate::lockfree::{AtomicDouble, Versioned};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Value carried by a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PortValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Array(Vec<f64>),
}

impl PortValue {
    fn type_name(&self) -> &'static str {
        match self {
            PortValue::Float(_) => "float",
            PortValue::Int(_) => "int",
            PortValue::Bool(_) => "bool",
            PortValue::Array(_) => "array",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PortValue::Float(v) => Some(*v),
            PortValue::Int(v) => Some(*v as f64),
            PortValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            PortValue::Array(_) => None,
        }
    }
}

/// Shape of a port's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    Float,
    Int,
    Bool,
    Array(usize),
}

impl PortKind {
    fn type_name(&self) -> &'static str {
        match self {
            PortKind::Float => "float",
            PortKind::Int => "int",
            PortKind::Bool => "bool",
            PortKind::Array(_) => "array",
        }
    }
}

/// How a port value is scaled between normalized (0-1) and real values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PortScale {
    /// `real = min + normalized * (max - min)`
    #[default]
    Linear,
    /// `real = min * (max/min)^normalized`, requires `min > 0`.
    Logarithmic,
    /// `curve > 1.0` gives more resolution at the low end.
    Exponential { curve: f64 },
    /// Normalized `< 0.5` is `min`, otherwise `max`.
    Toggle,
    Integer,
}

/// Valid range of a port together with its scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub scale: PortScale,
}

impl PortRange {
    pub fn new(min: f64, max: f64, default: f64, scale: PortScale) -> Self {
        debug_assert!(max > min, "max must be greater than min");
        Self {
            min,
            max,
            default: default.clamp(min, max),
            scale,
        }
    }

    pub fn linear(min: f64, max: f64, default: f64) -> Self {
        Self::new(min, max, default, PortScale::Linear)
    }

    pub fn logarithmic(min: f64, max: f64, default: f64) -> Self {
        debug_assert!(min > 0.0, "logarithmic scale requires min > 0");
        Self::new(min, max, default, PortScale::Logarithmic)
    }

    pub fn toggle(default_on: bool) -> Self {
        Self::new(0.0, 1.0, if default_on { 1.0 } else { 0.0 }, PortScale::Toggle)
    }

    /// Real value to normalized (0.0-1.0).
    pub fn normalize(&self, value: f64) -> f64 {
        let value = value.clamp(self.min, self.max);
        let range = self.max - self.min;
        if range <= 0.0 {
            return 0.0;
        }

        match self.scale {
            PortScale::Linear => (value - self.min) / range,
            PortScale::Logarithmic if self.min > 0.0 => {
                (value.ln() - self.min.ln()) / (self.max.ln() - self.min.ln())
            }
            PortScale::Logarithmic => (value - self.min) / range,
            PortScale::Exponential { curve } => {
                let linear = (value - self.min) / range;
                if curve <= 0.0 || curve == 1.0 {
                    linear
                } else {
                    linear.powf(1.0 / curve)
                }
            }
            PortScale::Toggle => {
                if value >= (self.min + self.max) / 2.0 {
                    1.0
                } else {
                    0.0
                }
            }
            PortScale::Integer => (value.round() - self.min) / range,
        }
    }

    /// Normalized (0.0-1.0) to real value.
    pub fn denormalize(&self, normalized: f64) -> f64 {
        let normalized = normalized.clamp(0.0, 1.0);
        let range = self.max - self.min;

        match self.scale {
            PortScale::Linear => self.min + normalized * range,
            PortScale::Logarithmic if self.min > 0.0 => {
                self.min * (self.max / self.min).powf(normalized)
            }
            PortScale::Logarithmic => self.min + normalized * range,
            PortScale::Exponential { curve } => {
                if curve <= 0.0 || curve == 1.0 {
                    self.min + normalized * range
                } else {
                    self.min + normalized.powf(curve) * range
                }
            }
            PortScale::Toggle => {
                if normalized >= 0.5 {
                    self.max
                } else {
                    self.min
                }
            }
            PortScale::Integer => (self.min + normalized * range).round(),
        }
    }
}

/// Serializable state of one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub name: String,
    pub value: PortValue,
}

/// A controllable parameter of a recall.
#[derive(Debug)]
pub struct Port {
    name: String,
    kind: PortKind,
    range: Option<PortRange>,
    convert_always: bool,
    scalar: AtomicDouble,
    array: Versioned<Vec<f64>>,
    version: AtomicU64,
}

impl Port {
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::with_kind(name, PortKind::Float, value)
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::with_kind(name, PortKind::Int, value as f64)
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::with_kind(name, PortKind::Bool, if value { 1.0 } else { 0.0 })
    }

    pub fn array(name: impl Into<String>, values: Vec<f64>) -> Self {
        let mut port = Self::with_kind(name, PortKind::Array(values.len()), 0.0);
        port.array = Versioned::new(values);
        port
    }

    fn with_kind(name: impl Into<String>, kind: PortKind, initial: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            range: None,
            convert_always: false,
            scalar: AtomicDouble::new(initial),
            array: Versioned::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Clamp scalar writes to `range`.
    pub fn with_range(mut self, range: PortRange) -> Self {
        self.scalar.set(range.default);
        self.range = Some(range);
        self
    }

    /// Treat every scalar write as a normalized value and denormalize it
    /// through the range.
    pub fn convert_always(mut self) -> Self {
        self.convert_always = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn range(&self) -> Option<&PortRange> {
        self.range.as_ref()
    }

    /// Bumped on every successful write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Hot-path scalar read.
    #[inline]
    pub fn get(&self) -> f64 {
        self.scalar.get()
    }

    /// Hot-path scalar write, bypassing conversion.
    #[inline]
    pub fn set(&self, value: f64) {
        self.scalar.set(value);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Raise the scalar to `value` if larger, for meter-style ports.
    #[inline]
    pub fn raise(&self, value: f64) {
        self.scalar.fetch_max(value);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn get_bool(&self) -> bool {
        self.scalar.get() >= 0.5
    }

    pub fn get_array(&self) -> Arc<Vec<f64>> {
        self.array.load()
    }

    pub fn safe_read(&self) -> PortValue {
        match self.kind {
            PortKind::Float => PortValue::Float(self.scalar.get()),
            PortKind::Int => PortValue::Int(self.scalar.get().round() as i64),
            PortKind::Bool => PortValue::Bool(self.get_bool()),
            PortKind::Array(_) => PortValue::Array(self.array.load().as_ref().clone()),
        }
    }

    pub fn safe_write(&self, value: PortValue) -> Result<(), PortError> {
        let mismatch = |found: &PortValue| PortError::TypeMismatch {
            port: self.name.clone(),
            expected: self.kind.type_name(),
            found: found.type_name(),
        };

        match (self.kind, &value) {
            (PortKind::Array(len), PortValue::Array(values)) => {
                if values.len() != len {
                    return Err(PortError::LengthMismatch {
                        port: self.name.clone(),
                        expected: len,
                        found: values.len(),
                    });
                }
                self.array.store(values.clone());
            }
            (PortKind::Array(_), other) => return Err(mismatch(other)),
            (_, PortValue::Array(_)) => return Err(mismatch(&value)),
            (PortKind::Bool, PortValue::Bool(b)) => {
                self.scalar.set(if *b { 1.0 } else { 0.0 });
            }
            (PortKind::Bool, other) => return Err(mismatch(other)),
            (PortKind::Float | PortKind::Int, PortValue::Bool(_)) => {
                return Err(mismatch(&value))
            }
            (kind, scalar) => {
                let raw = scalar.as_f64().ok_or_else(|| mismatch(scalar))?;
                let mut converted = match self.range {
                    Some(range) if self.convert_always => range.denormalize(raw),
                    Some(range) => raw.clamp(range.min, range.max),
                    None => raw,
                };
                if kind == PortKind::Int {
                    converted = converted.round();
                }
                self.scalar.set(converted);
            }
        }

        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            name: self.name.clone(),
            value: self.safe_read(),
        }
    }
}

/// The ports of one recall container, shared by its templates and instances.
#[derive(Debug, Default)]
pub struct PortSet {
    ports: Vec<Arc<Port>>,
}

impl PortSet {
    pub fn new(ports: Vec<Port>) -> Self {
        Self {
            ports: ports.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Port>> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Port>, PortError> {
        self.find(name)
            .ok_or_else(|| PortError::UnknownPort(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Port>> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PortSnapshot> {
        self.ports.iter().map(|p| p.snapshot()).collect()
    }

    /// Write back a snapshot; stops at the first port that rejects its value.
    pub fn restore(&self, snapshot: &[PortSnapshot]) -> Result<(), PortError> {
        for entry in snapshot {
            self.get(&entry.name)?.safe_write(entry.value.clone())?;
        }
        Ok(())
    }
}
