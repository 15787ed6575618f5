//! Builder for configuring and constructing a `TactusEngine`.

use crate::{Result, TactusEngine};
use tactus_core::{EngineConfig, RecallRegistry, SoundFormat};
use tactus_thread::PoolConfig;

/// Stock recall families are registered automatically when the `fx` feature
/// is compiled; pass a registry of your own to add more.
///
/// # Example
///
/// ```ignore
/// use tactus::prelude::*;
///
/// let engine = TactusEngine::builder()
///     .samplerate(48000)
///     .buffer_size(256)
///     .workers(4)
///     .build()?;
/// ```
pub struct TactusEngineBuilder {
    config: EngineConfig,
    registry: Option<RecallRegistry>,
    outputs: usize,
    /// Device ring capacity in tics.
    ring_tics: usize,
    stock_recalls: bool,
}

impl Default for TactusEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            outputs: 2,
            ring_tics: 4,
            stock_recalls: true,
        }
    }
}

impl TactusEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse an [`EngineConfig`] from TOML.
    pub fn config_toml(mut self, toml: &str) -> Result<Self> {
        self.config = EngineConfig::from_toml_str(toml)?;
        Ok(self)
    }

    pub fn samplerate(mut self, samplerate: u32) -> Self {
        self.config.samplerate = samplerate;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn format(mut self, format: SoundFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Default: one per core, at least 2
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Run workers at maximum thread priority.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.config.realtime = realtime;
        self
    }

    /// Structural tasks applied per tic boundary.
    pub fn task_budget(mut self, budget: usize) -> Self {
        self.config.task_budget = budget;
        self
    }

    /// Default: 2
    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = count;
        self
    }

    pub fn ring_tics(mut self, tics: usize) -> Self {
        self.ring_tics = tics;
        self
    }

    pub fn registry(mut self, registry: RecallRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Skip registering the stock families.
    pub fn without_stock_recalls(mut self) -> Self {
        self.stock_recalls = false;
        self
    }

    pub fn build(self) -> Result<TactusEngine> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_default();

        #[cfg(feature = "fx")]
        if self.stock_recalls {
            tactus_fx::register_all(&registry);
        }

        let pool = PoolConfig::from_engine(&self.config);
        let frames = self.config.buffer_size * self.ring_tics.max(1);
        TactusEngine::from_parts(self.config, registry, pool, frames, self.outputs)
    }
}
