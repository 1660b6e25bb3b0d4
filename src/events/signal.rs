//! Raw signals produced by a workflow run, before routing.
//!
//! A worker thread never builds dispatchable [`Event`](crate::events::Event)s
//! for progress; it reports stage signals and lets the loop-side progress
//! state machine decide what becomes observable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{Artifact, ProposedAction};

/// Stage-level progress reported by the execution engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSignal {
    /// `processed` units handled so far; `total` when the engine knows it.
    Parsing {
        processed: u64,
        total: Option<u64>,
        message: Option<String>,
    },
    /// Parsing is done. The next stage starts with the first generation signal.
    EndOfParsing,
    /// `percent` of generation sub-phase `phase` (index into the configured bands).
    Generating {
        phase: usize,
        percent: f64,
        message: Option<String>,
    },
    Completed {
        message: Option<String>,
    },
    Failed {
        message: String,
    },
}

impl StageSignal {
    pub fn name(&self) -> &'static str {
        match self {
            StageSignal::Parsing { .. } => "parsing",
            StageSignal::EndOfParsing => "end_of_parsing",
            StageSignal::Generating { .. } => "generating",
            StageSignal::Completed { .. } => "completed",
            StageSignal::Failed { .. } => "failed",
        }
    }
}

/// Typed envelope of one execution signal.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSignal {
    /// A run is about to start on the session.
    Started,
    Stage(StageSignal),
    HumanInputRequired(ProposedAction),
    Artifact(Artifact),
    Response { content: Value },
    Failed { message: String },
    Cancelled { reason: String },
    /// External request to return the session's progress to READY.
    Reset { reason: String },
    /// The session was closed or replaced; its progress is dropped.
    Closed,
}

impl RunSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunSignal::Response { .. } | RunSignal::Failed { .. } | RunSignal::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub workflow_id: String,
    pub session_id: String,
    pub signal: RunSignal,
}

impl SignalEnvelope {
    pub fn new(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        signal: RunSignal,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            signal,
        }
    }
}

/// Operator answer to a human-input-required pause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HumanDecision {
    Approve,
    Reject { reason: Option<String> },
}
