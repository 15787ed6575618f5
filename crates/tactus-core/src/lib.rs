//! Recycling contexts, recall state machines and the channel/audio graph.
//!
//! # Primary API
//!
//! - [`EngineContext`]: owner of every manager, entry point for structural edits
//! - [`AudioGraph`]: audios, channels and recyclings in an id-keyed arena
//! - [`ContextTree`]: copy-on-write recycling-context tree
//! - [`RecallTree`]: templates, running instances and their mapped children
//! - [`RecallRegistry`]: recall families by name
//!
//! # Example
//!
//! ```ignore
//! use tactus_core::*;
//!
//! let engine = EngineContext::new(EngineConfig::default(), RecallRegistry::new());
//! let synth = engine.add_audio(AudioSpec::new("synth").audio_channels(2));
//! let context = engine.start_playback(synth, SoundScope::Playback)?;
//! ```

#[macro_use]
mod macros;

pub mod error;
pub use error::{BusyReason, Error, GraphError, PortError, RecallError, RecallResult, Result};

mod id;
pub use id::{AudioId, ChannelId, ContainerId, ContextId, RecallId, RecallKey, RecyclingId, SignalId};

pub mod config;
pub use config::EngineConfig;

mod scope;
pub use scope::{AbilityFlags, SoundScope, Stage};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, Versioned};

pub mod format;
pub use format::{PcmBuffer, SoundFormat};

pub mod port;
pub use port::{Port, PortKind, PortRange, PortScale, PortSet, PortSnapshot, PortValue};

pub mod audio_signal;
pub use audio_signal::{AudioSignal, SignalParams, SignalTiming};

mod recycling;
pub use recycling::Recycling;

pub mod context;
pub use context::{ContextTree, DepthToken, RecyclingContext};

mod recall_id;
pub use recall_id::{RecallIdEntry, RecallIdRegistry};

pub mod recall;
pub use recall::{
    get_param, get_param_or, ChannelRun, ContainerRegistry, MapChild, MappedRecall, ParamValue,
    ReapReport, Recall, RecallContainer, RecallEvent, RecallFactory, RecallFlags, RecallParams,
    RecallRegistry, RecallScope, RecallState, RecallTarget, RecallTree, RecyclingRun, RunContext,
    RunEnv, TicInfo, UnitTarget, WorkUnit,
};

pub mod graph;
pub use graph::{Audio, AudioGraph, AudioSpec, Channel, ChannelKind, ResizeReport};

mod playback;
pub use playback::{Playback, PlaybackDomain};

mod system;
pub use system::{EngineContext, IsolationViolation, TicGuard};
