//! Recalls: staged processing behavior bound to one recall id.
//!
//! A recall exists first as a *template* attached to an audio or a channel.
//! Binding a template to a recycling context duplicates it into a running
//! instance; the instance then maps one child per recycling of its channel,
//! and every recycling-level child maps one child per audio signal:
//!
//! ```text
//! Channel instance ──► Recycling child (per recycling in the context)
//!                          └─► AudioSignal child (per signal on the mapped side)
//! ```
//!
//! Children are created lazily during the parent's `run_pre` and never for
//! recyclings outside the bound context or its direct children.

mod container;
mod registry;
mod relay;
mod run;
mod state;
mod tree;

pub use container::{ContainerRegistry, RecallContainer};
pub use registry::{
    get_param, get_param_or, ParamValue, RecallFactory, RecallParams, RecallRegistry,
};
pub use relay::{ChannelRun, ChildBuilder, RecyclingRun};
pub use run::{run_stage, run_tree, run_unit, RunContext, RunEnv};
pub use state::{RecallEvent, RecallState};
pub use tree::{ReapReport, RecallNode, RecallTree, RootEntry, SharedNode};

use crate::error::RecallResult;
use crate::graph::ChannelKind;
use crate::{AbilityFlags, AudioId, ChannelId, ContainerId, ContextId, RecyclingId, SignalId, Stage};
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

/// Level of the audio hierarchy a recall works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallScope {
    Audio,
    Channel,
    Recycling,
    AudioSignal,
}

/// What a recall node is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecallTarget {
    Audio(AudioId),
    Channel {
        channel: ChannelId,
        destination: Option<ChannelId>,
    },
    Recycling {
        source: RecyclingId,
        destination: Option<RecyclingId>,
    },
    Signal {
        recycling: RecyclingId,
        signal: SignalId,
    },
}

impl RecallTarget {
    pub fn channel(channel: ChannelId) -> Self {
        RecallTarget::Channel {
            channel,
            destination: None,
        }
    }

    pub fn scope(&self) -> RecallScope {
        match self {
            RecallTarget::Audio(_) => RecallScope::Audio,
            RecallTarget::Channel { .. } => RecallScope::Channel,
            RecallTarget::Recycling { .. } => RecallScope::Recycling,
            RecallTarget::Signal { .. } => RecallScope::AudioSignal,
        }
    }
}

/// Which side of a recycling recall drives signal-level child creation.
///
/// Every recycling recall declares exactly one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapChild {
    Source,
    Destination,
}

/// Independent per-recall switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecallFlags {
    /// `done` is ignored while set; cleared by `stop_persistent`.
    pub persistent: bool,
    /// Become done once the last child has been reaped.
    pub propagate_done: bool,
}

impl RecallFlags {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            propagate_done: false,
        }
    }

    pub fn propagate_done() -> Self {
        Self {
            persistent: false,
            propagate_done: true,
        }
    }
}

/// Timing of the tic being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TicInfo {
    pub tic: u64,
    pub frame_offset: u64,
    pub note_offset: u32,
}

/// Subtree a worker runs: the instances bound to one audio or one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitTarget {
    Audio(AudioId),
    Channel(ChannelId),
}

impl core::fmt::Display for UnitTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UnitTarget::Audio(id) => write!(f, "{id}"),
            UnitTarget::Channel(id) => write!(f, "{id}"),
        }
    }
}

/// One disjoint piece of work within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub context: ContextId,
    pub target: UnitTarget,
}

impl core::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.target, self.context)
    }
}

/// A recall family mapped onto an audio, kept so channels added by a resize
/// receive their templates too.
#[derive(Debug, Clone)]
pub struct MappedRecall {
    pub name: String,
    pub kind: ChannelKind,
    pub params: RecallParams,
    pub container: ContainerId,
}

/// Staged processing behavior.
///
/// All stage callbacks default to doing nothing. A recall requests its own
/// completion through [`RunContext::mark_done`].
pub trait Recall: DynClone + Send {
    fn name(&self) -> &str;

    /// Sound scopes this recall takes part in.
    fn ability(&self) -> AbilityFlags {
        AbilityFlags::ALL
    }

    fn run_init(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
        Ok(())
    }

    fn run_pre(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
        Ok(())
    }

    fn run_inter(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
        Ok(())
    }

    fn run_post(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, cx: &mut RunContext<'_>) -> RecallResult {
        match stage {
            Stage::Init => self.run_init(cx),
            Stage::Pre => self.run_pre(cx),
            Stage::Inter => self.run_inter(cx),
            Stage::Post => self.run_post(cx),
        }
    }

    fn on_done(&mut self) {}

    fn on_cancel(&mut self) {}

    /// Side a recycling recall maps its signal children from.
    fn map_child(&self) -> Option<MapChild> {
        None
    }

    /// Child behavior for the next level down, or `None` for a leaf.
    fn new_child(&self, _target: &RecallTarget) -> Option<Box<dyn Recall>> {
        None
    }
}

dyn_clone::clone_trait_object!(Recall);

impl core::fmt::Debug for dyn Recall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Recall").field("name", &self.name()).finish()
    }
}
