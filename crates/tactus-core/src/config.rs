//! Engine configuration.

use crate::audio_signal::SignalParams;
use crate::{Error, Result, SoundFormat};
use serde::{Deserialize, Serialize};

/// Configuration for the recall engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub samplerate: u32,
    /// Frames per tic.
    pub buffer_size: usize,
    /// Format new recyclings store their PCM in.
    pub format: SoundFormat,
    /// Worker threads; `0` picks the available parallelism.
    pub workers: usize,
    /// Raise worker threads to maximum priority.
    pub realtime: bool,
    /// Tasks consumed per tic boundary.
    pub task_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samplerate: 44100,
            buffer_size: 512,
            format: SoundFormat::S16,
            workers: 0,
            realtime: true,
            task_budget: 64,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384_000).contains(&self.samplerate) {
            return Err(Error::InvalidConfig(format!(
                "samplerate {} out of range (8000-384000 Hz)",
                self.samplerate
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > 65536 {
            return Err(Error::InvalidConfig(format!(
                "buffer_size {} out of range (1-65536 frames)",
                self.buffer_size
            )));
        }
        if self.task_budget == 0 {
            return Err(Error::InvalidConfig("task_budget must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved worker count (never zero).
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }

    /// Parameters new recyclings start with.
    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            samplerate: self.samplerate,
            buffer_size: self.buffer_size,
            format: self.format,
        }
    }

    /// Duration of one tic in seconds.
    pub fn tic_period(&self) -> f64 {
        self.buffer_size as f64 / self.samplerate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.samplerate, 44100);
        assert!(config.validate().is_ok());
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_invalid_samplerate() {
        let config = EngineConfig {
            samplerate: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EngineConfig::from_toml_str(
            r#"
            samplerate = 48000
            format = "float"
            workers = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.samplerate, 48000);
        assert_eq!(config.format, SoundFormat::Float);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.buffer_size, 512);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(EngineConfig::from_toml_str("buffer_size = 0").is_err());
        assert!(matches!(
            EngineConfig::from_toml_str("samplerate = \"fast\""),
            Err(Error::ConfigParse(_))
        ));
    }
}
