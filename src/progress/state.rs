//! Observable progress representation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Ready,
    Parsing,
    Generating,
    Completed,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ready => "READY",
            Stage::Parsing => "PARSING",
            Stage::Generating => "GENERATING",
            Stage::Completed => "COMPLETED",
            Stage::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub stage: Stage,
    /// Always within `[0, 100]`.
    pub percentage: f64,
    pub message: String,
}

impl ProgressState {
    pub fn ready() -> Self {
        Self {
            stage: Stage::Ready,
            percentage: 0.0,
            message: "ready".to_string(),
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::ready()
    }
}
