//! Recall lifecycle state machine.

use crate::error::RecallError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecallState {
    /// Static form attached to an audio or channel; never runs.
    Template,
    /// Duplicated from a template and bound to a recall id.
    Instantiated,
    Initializing,
    Running,
    /// Skipped by the tic but kept until removed.
    Done,
    /// Cancelled or removed, waiting to be reaped between tics.
    Removing,
    Freed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecallEvent {
    BeginInit,
    InitComplete,
    InitFailed,
    Complete,
    Resume,
    Remove,
    Cancel,
    Free,
}

impl RecallState {
    /// `Removing` and `Freed` accept nothing but reaping.
    pub fn is_terminal(self) -> bool {
        matches!(self, RecallState::Removing | RecallState::Freed)
    }

    /// Whether the tic invokes run stages on this recall.
    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            RecallState::Instantiated | RecallState::Initializing | RecallState::Running
        )
    }

    pub fn transition(self, event: RecallEvent) -> Result<RecallState, RecallError> {
        use RecallEvent::*;
        use RecallState::*;

        let next = match (self, event) {
            (Instantiated, BeginInit) => Initializing,
            (Initializing, InitComplete) => Running,
            (Initializing, InitFailed) => Instantiated,
            (Instantiated | Initializing | Running, Complete) => Done,
            (Done, Complete) => Done,
            (Done, Resume) => Running,
            (Done, Remove) => Removing,
            (state, Cancel) if !state.is_terminal() => Removing,
            (Removing, Cancel) => Removing,
            (Removing, Free) => Freed,
            (from, event) => return Err(RecallError::InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
