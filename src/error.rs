//! Error types for the flowrelay session and event routing core.

use std::time::Duration;

use thiserror::Error;

use crate::progress::Stage;

/// Session authority errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session conflict: user '{user_id}' already has live session {existing} for workflow '{workflow_id}'")]
    Conflict {
        user_id: String,
        workflow_id: String,
        existing: String,
    },

    #[error("Conversation store error: {0}")]
    Store(String),

    #[error("Session authority is not installed")]
    NotInstalled,

    #[error("Session authority is already installed")]
    AlreadyInstalled,
}

/// Failure reported by a single event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Rejected progress signals
#[derive(Debug, Error, PartialEq)]
pub enum ProgressError {
    #[error("Signal '{signal}' is not valid in stage {from:?}")]
    InvalidTransition { from: Stage, signal: &'static str },

    #[error("Stage {0:?} is terminal; reset is required before further progress")]
    Terminal(Stage),

    #[error("Unknown generation sub-phase {phase} ({bands} configured)")]
    UnknownSubPhase { phase: usize, bands: usize },

    #[error("Invalid generation bands: {0}")]
    InvalidBands(String),
}

/// Event loop lifecycle errors
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Event bridge is already attached to a loop")]
    AlreadyAttached,

    #[error("Failed to spawn event loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to build event loop runtime: {0}")]
    Runtime(String),
}

/// Outcome of an engine run that did not produce a response.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(String),
}

/// Live client connection errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Timed out after {0:?} waiting for an outbound message")]
    TimedOut(Duration),
}

/// Orchestrator request errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Session {0} already has a run in progress")]
    RunInProgress(String),

    #[error("Session {0} is not waiting for operator input")]
    NoPendingInput(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{0}")]
    Invalid(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Top-level service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
