//! Stock recall families for the tactus recall engine.
//!
//! Each family is a [`RecallFactory`](tactus_core::RecallFactory) that maps
//! onto an audio's channels (or the audio itself) through
//! `EngineContext::map_recall`:
//!
//! | name          | scope   | ports                                   |
//! |---------------|---------|-----------------------------------------|
//! | `stream`      | channel | none                                    |
//! | `volume`      | channel | `volume`                                |
//! | `mute`        | channel | `muted`                                 |
//! | `peak`        | channel | `peak`                                  |
//! | `copy`        | channel | `gain`                                  |
//! | `lfo`         | channel | `frequency`, `depth`, `phase-offset`    |
//! | `eq10`        | channel | `peak-28hz` .. `peak-14336hz`, `pressure` |
//! | `envelope`    | channel | `attack`, `decay`, `sustain`, `release`, `length` |
//! | `count-beats` | audio   | `bpm`, `loop`, loop bounds, counters    |
//! | `delay`       | audio   | `bpm`, `tact`, `delay`, step counters   |
//!
//! ```ignore
//! let registry = RecallRegistry::new();
//! tactus_fx::register_all(&registry);
//! let engine = EngineContext::new(EngineConfig::default(), registry);
//! ```

mod error;
mod signal;

pub mod copy;
pub mod count_beats;
pub mod delay;
pub mod envelope;
pub mod eq10;
pub mod lfo;
pub mod mute;
pub mod peak;
pub mod stream;
pub mod volume;

pub use copy::CopyFactory;
pub use count_beats::{counter_port, CountBeatsFactory};
pub use delay::{step_for, DelayFactory};
pub use envelope::{Adsr, EnvelopeFactory};
pub use eq10::{band_port, Eq10Factory};
pub use error::{FxError, Result};
pub use lfo::{LfoFactory, LfoShape};
pub use mute::MuteFactory;
pub use peak::PeakFactory;
pub use stream::StreamFactory;
pub use volume::VolumeFactory;

use tactus_core::RecallRegistry;

/// Register every stock family.
pub fn register_all(registry: &RecallRegistry) {
    registry.register(StreamFactory);
    registry.register(VolumeFactory);
    registry.register(MuteFactory);
    registry.register(PeakFactory);
    registry.register(CopyFactory);
    registry.register(LfoFactory);
    registry.register(Eq10Factory);
    registry.register(EnvelopeFactory);
    registry.register(CountBeatsFactory);
    registry.register(DelayFactory);
    tracing::debug!(families = registry.list_types().len(), "registered stock recalls");
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let registry = RecallRegistry::new();
        register_all(&registry);
        assert_eq!(
            registry.list_types(),
            vec!["copy", "count-beats", "delay", "envelope", "eq10", "lfo", "mute", "peak", "stream", "volume"]
        );
    }
}
