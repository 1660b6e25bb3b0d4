//! Event type tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag of the closed event taxonomy. The dispatcher keys its handler table
/// by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    HumanInputRequired,
    ArtifactProduced,
    TerminalResponse,
    TerminalError,
    Cancelled,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Progress,
        EventKind::HumanInputRequired,
        EventKind::ArtifactProduced,
        EventKind::TerminalResponse,
        EventKind::TerminalError,
        EventKind::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::HumanInputRequired => "human_input_required",
            EventKind::ArtifactProduced => "artifact_produced",
            EventKind::TerminalResponse => "terminal_response",
            EventKind::TerminalError => "terminal_error",
            EventKind::Cancelled => "cancelled",
        }
    }

    /// Terminal kinds end the interactive turn for their session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::TerminalResponse | EventKind::TerminalError | EventKind::Cancelled
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}
