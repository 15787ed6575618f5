//! Error types for tactus-core.

use crate::recall::{RecallEvent, RecallState};
use crate::{AudioId, ChannelId, ContextId, RecallKey, RecyclingId, SignalId, Stage};
use thiserror::Error;

/// Why a structural mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// A tic is running over the target.
    TicInFlight,
    /// The context still has child contexts alive.
    LiveChildren,
    /// Another structural task already touched the target at this boundary.
    PendingMutation,
}

impl core::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BusyReason::TicInFlight => f.write_str("tic in flight"),
            BusyReason::LiveChildren => f.write_str("parent has live children"),
            BusyReason::PendingMutation => f.write_str("mutation already pending this tic"),
        }
    }
}

/// Structural errors, returned synchronously to the submitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Busy: {0}")]
    Busy(BusyReason),

    #[error("Cycle detected in context tree at {0}")]
    CycleDetected(ContextId),

    #[error("Unknown audio: {0}")]
    UnknownAudio(AudioId),

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Unknown recycling: {0}")]
    UnknownRecycling(RecyclingId),

    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("Unknown recall: {0}")]
    UnknownRecall(RecallKey),

    #[error("Count mismatch: expected {expected}, found {found}")]
    CountMismatch { expected: usize, found: usize },

    #[error("Recycling {0} is not part of context {1}")]
    RecyclingNotInContext(RecyclingId, ContextId),

    #[error("Invalid link: {0}")]
    InvalidLink(String),
}

/// Errors raised while running recalls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecallError {
    #[error("Recall {0} ran {1:?} before run_init completed")]
    NotReady(RecallKey, Stage),

    #[error("Signal {signal} of {signal_context} accessed under {context}")]
    CrossScopeSignal {
        signal: SignalId,
        signal_context: ContextId,
        context: ContextId,
    },

    #[error("Recycling {recycling} is not listed by {context}")]
    NotInContext {
        recycling: RecyclingId,
        context: ContextId,
    },

    #[error("Invalid transition {event:?} from {from:?}")]
    InvalidTransition { from: RecallState, event: RecallEvent },

    #[error("Unknown recall: {0}")]
    UnknownRecall(RecallKey),

    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("Unknown recycling: {0}")]
    UnknownRecycling(RecyclingId),

    #[error("Unknown signal {0} in {1}")]
    UnknownSignal(SignalId, RecyclingId),

    #[error("Unknown recall type: {0}")]
    UnknownType(String),

    #[error("Recycling recall '{0}' declares no child mapping side")]
    MissingMapChild(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{0}': {1}")]
    InvalidParameter(String, String),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("{0}")]
    Failed(String),
}

/// Errors from port access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortError {
    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error("Port '{port}' holds {expected}, got {found}")]
    TypeMismatch {
        port: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Port '{port}' expects {expected} values, got {found}")]
    LengthMismatch {
        port: String,
        expected: usize,
        found: usize,
    },
}

/// Error type for tactus-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Recall(#[from] RecallError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// `true` for errors a task submitter should retry next tic.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Graph(GraphError::Busy(_)))
    }
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Result of a single recall callback.
pub type RecallResult<T = ()> = core::result::Result<T, RecallError>;
