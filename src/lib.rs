//! # Tactus - Recall Execution Engine
//!
//! Runs a graph of audios through recalls: small processing behaviors bound
//! to recycling contexts and executed in fixed stages every tic.
//!
//! ## Architecture
//!
//! Tactus is an umbrella crate that coordinates:
//! - **tactus-core** - Audio graph, recycling contexts, recall ids, the recall tree and its scheduler
//! - **tactus-thread** - Worker pool, stage barrier, task queue and the tic driver
//! - **tactus-fx** - Stock recall families (stream, volume, mute, peak, copy, lfo, eq10, envelope, count-beats, delay)
//!
//! ## Quick Start
//!
//! ```ignore
//! use tactus::prelude::*;
//!
//! let engine = TactusEngine::builder().build()?;
//!
//! let drum = engine.add_audio(AudioSpec::new("drum").audio_channels(2));
//! engine.map_recall(drum, "stream", params! {}, ChannelKind::Input, 0, 0)?;
//! engine.map_recall(drum, "copy", params! {}, ChannelKind::Input, 0, 0)?;
//! engine.start_playback(drum, SoundScope::Playback)?;
//!
//! // Drive tics from a background thread
//! engine.start()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Engine with the stock recalls
//! - `fx` - Stock recall families

/// Re-export of tactus-core for direct access
pub use tactus_core as core;

/// Re-export of tactus-thread for direct access
pub use tactus_thread as thread;

pub use tactus_core::params;

// Core types
pub use tactus_core::{
    AbilityFlags,
    // Graph
    AudioId,
    AudioSignal,
    AudioSpec,
    BusyReason,
    ChannelId,
    ChannelKind,
    ContainerId,
    ContextId,
    EngineConfig,
    EngineContext,
    GraphError,
    IsolationViolation,
    ParamValue,
    PcmBuffer,
    // Ports
    Port,
    PortRange,
    PortSet,
    PortValue,
    // Recalls
    Recall,
    RecallError,
    RecallFactory,
    RecallFlags,
    RecallId,
    RecallKey,
    RecallParams,
    RecallRegistry,
    RecallResult,
    RecallState,
    RecallTarget,
    RecyclingId,
    ResizeReport,
    RunContext,
    SignalId,
    SoundFormat,
    SoundScope,
    Stage,
};

// Threading
pub use tactus_thread::{Task, TaskKind, TaskOutcome, TaskTicket, TicMetrics, TicReport, WorkerError};

// Stock recalls
#[cfg(feature = "fx")]
pub use tactus_fx as fx;

#[cfg(feature = "fx")]
pub use tactus_fx::LfoShape;

mod builder;
mod engine;
mod error;

pub use builder::TactusEngineBuilder;
pub use engine::TactusEngine;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    // Main engine
    pub use crate::{TactusEngine, TactusEngineBuilder};

    // Essential types
    pub use crate::core::{
        params, AudioId, AudioSpec, ChannelKind, ContainerId, ContextId, PortValue, RecallParams, SoundScope,
    };

    // Tasks
    pub use crate::thread::{Task, TicReport};

    // Writing recalls
    pub use crate::core::{Recall, RecallFactory, RecallResult, RecallTarget, RunContext};
}
