//! Event schema and the outbound client message shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventKind;
use crate::progress::ProgressState;
use crate::types::format_timestamp;

/// An action the run proposes and waits on an operator to confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_id: String,
    pub summary: String,
    #[serde(default)]
    pub details: Value,
}

/// A discrete output unit ready for display (a document, a code block, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub title: String,
    pub media_type: String,
    pub content: String,
}

/// Typed payload. The variant determines the event's [`EventKind`], so a
/// tag and its payload can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Progress(ProgressState),
    HumanInputRequired(ProposedAction),
    ArtifactProduced(Artifact),
    TerminalResponse { content: Value },
    TerminalError { message: String },
    Cancelled { reason: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Progress(_) => EventKind::Progress,
            EventPayload::HumanInputRequired(_) => EventKind::HumanInputRequired,
            EventPayload::ArtifactProduced(_) => EventKind::ArtifactProduced,
            EventPayload::TerminalResponse { .. } => EventKind::TerminalResponse,
            EventPayload::TerminalError { .. } => EventKind::TerminalError,
            EventPayload::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    fn data(&self) -> Value {
        let value = match self {
            EventPayload::Progress(state) => serde_json::to_value(state),
            EventPayload::HumanInputRequired(action) => serde_json::to_value(action),
            EventPayload::ArtifactProduced(artifact) => serde_json::to_value(artifact),
            EventPayload::TerminalResponse { content } => {
                Ok(serde_json::json!({ "content": content }))
            }
            EventPayload::TerminalError { message } => {
                Ok(serde_json::json!({ "message": message }))
            }
            EventPayload::Cancelled { reason } => Ok(serde_json::json!({ "reason": reason })),
        };
        value.unwrap_or_default()
    }
}

/// Immutable record of a state change for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    payload: EventPayload,
    workflow_id: String,
    session_id: String,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self::with_timestamp(workflow_id, session_id, payload, Utc::now())
    }

    pub fn with_timestamp(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            payload,
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Wire shape sent to the session's live client connection.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            event_type: self.kind(),
            data: self.payload.data(),
            workflow_id: self.workflow_id.clone(),
            session_id: self.session_id.clone(),
            timestamp: format_timestamp(&self.timestamp),
        }
    }
}

/// One message per dispatched event: `{type, data, workflow_id, session_id, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub event_type: EventKind,
    pub data: Value,
    pub workflow_id: String,
    pub session_id: String,
    pub timestamp: String,
}
