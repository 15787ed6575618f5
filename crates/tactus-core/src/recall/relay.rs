//! Generic channel and recycling levels for recall families whose work happens
//! on the signals.

use super::{MapChild, Recall, RecallTarget, RunContext};
use crate::error::RecallResult;
use crate::AbilityFlags;
use std::sync::Arc;

/// Builds a child behavior for the target it is mapped to.
pub type ChildBuilder = Arc<dyn Fn(&RecallTarget) -> Option<Box<dyn Recall>> + Send + Sync>;

/// Channel-scope recall that hands each recycling to a child builder.
#[derive(Clone)]
pub struct ChannelRun {
    name: String,
    ability: AbilityFlags,
    child: ChildBuilder,
}

impl ChannelRun {
    pub fn new<F>(name: impl Into<String>, child: F) -> Self
    where
        F: Fn(&RecallTarget) -> Option<Box<dyn Recall>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ability: AbilityFlags::ALL,
            child: Arc::new(child),
        }
    }

    pub fn with_ability(mut self, ability: AbilityFlags) -> Self {
        self.ability = ability;
        self
    }
}

impl Recall for ChannelRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn ability(&self) -> AbilityFlags {
        self.ability
    }

    fn new_child(&self, target: &RecallTarget) -> Option<Box<dyn Recall>> {
        match target {
            RecallTarget::Recycling { .. } => (self.child)(target),
            _ => None,
        }
    }
}

/// Recycling-scope recall mapping one signal-level child per signal of its
/// [`MapChild`] side.
#[derive(Clone)]
pub struct RecyclingRun {
    name: String,
    map_child: MapChild,
    ability: AbilityFlags,
    seed_signal: bool,
    child: ChildBuilder,
}

impl RecyclingRun {
    pub fn new<F>(name: impl Into<String>, map_child: MapChild, child: F) -> Self
    where
        F: Fn(&RecallTarget) -> Option<Box<dyn Recall>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            map_child,
            ability: AbilityFlags::ALL,
            seed_signal: false,
            child: Arc::new(child),
        }
    }

    /// Create a signal of its own on the mapped side during `run_init`.
    pub fn seeded(mut self) -> Self {
        self.seed_signal = true;
        self
    }

    pub fn with_ability(mut self, ability: AbilityFlags) -> Self {
        self.ability = ability;
        self
    }
}

impl Recall for RecyclingRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn ability(&self) -> AbilityFlags {
        self.ability
    }

    fn run_init(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        if !self.seed_signal {
            return Ok(());
        }
        let RecallTarget::Recycling {
            source,
            destination,
        } = cx.target()
        else {
            return Ok(());
        };
        let mapped = match self.map_child {
            MapChild::Source => Some(source),
            MapChild::Destination => destination,
        };
        if let Some(recycling) = mapped.filter(|r| cx.context().contains(*r)) {
            if cx.own_signals(recycling)?.is_empty() {
                cx.create_signal(recycling)?;
            }
        }
        Ok(())
    }

    fn map_child(&self) -> Option<MapChild> {
        Some(self.map_child)
    }

    fn new_child(&self, target: &RecallTarget) -> Option<Box<dyn Recall>> {
        match target {
            RecallTarget::Signal { .. } => (self.child)(target),
            _ => None,
        }
    }
}
