//! Configuration System
//!
//! Layered service configuration: built-in defaults, the user's global file,
//! the project's `config/` directory, then `FLOWRELAY__*` environment
//! variables. Components never read configuration themselves; the service
//! hands them the values they need at construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ProgressError};
use crate::logging::{parse_format, parse_output, LoggingConfig};
use crate::orchestrator::{OrchestratorSettings, ProgressProfiles};
use crate::progress::{default_band_specs, BandSpec, GenerationBands};
use crate::sessions::ConflictPolicy;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per-workflow overrides keyed by workflow id
    #[serde(default)]
    pub workflows: HashMap<String, WorkflowConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Registry shards; more shards means less contention between keys
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Idle time after which a session without a running workflow is evicted
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the idle sweep runs; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// What a force_new request does when a live session exists
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

fn default_shard_count() -> usize {
    16
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Percentage points per parsed unit when the total is unknown
    #[serde(default = "default_unknown_total_increment")]
    pub unknown_total_increment: f64,

    /// Ordered generation sub-phases
    #[serde(default = "default_band_specs")]
    pub generation_bands: Vec<BandSpec>,
}

fn default_unknown_total_increment() -> f64 {
    2.0
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            unknown_total_increment: default_unknown_total_increment(),
            generation_bands: default_band_specs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// How often a worker paused on human input re-checks cancellation
    #[serde(default = "default_human_input_poll_ms")]
    pub human_input_poll_ms: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_human_input_poll_ms() -> u64 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            human_input_poll_ms: default_human_input_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_bands: Option<Vec<BandSpec>>,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Logging(String),
    Sessions(String),
    Progress(String),
    Orchestrator(String),
    Workflow(String, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
            ValidationError::Sessions(msg) => write!(f, "Sessions: {}", msg),
            ValidationError::Progress(msg) => write!(f, "Progress: {}", msg),
            ValidationError::Orchestrator(msg) => write!(f, "Orchestrator: {}", msg),
            ValidationError::Workflow(id, msg) => write!(f, "Workflow '{}': {}", id, msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ServiceConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = parse_format(&self.logging.format) {
            errors.push(ValidationError::Logging(e.to_string()));
        }
        if let Err(e) = parse_output(&self.logging.output) {
            errors.push(ValidationError::Logging(e.to_string()));
        }

        if self.sessions.shard_count == 0 {
            errors.push(ValidationError::Sessions(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.sessions.idle_timeout_secs == 0 {
            errors.push(ValidationError::Sessions(
                "idle_timeout_secs must be positive".to_string(),
            ));
        }

        let increment = self.progress.unknown_total_increment;
        if !increment.is_finite() || increment <= 0.0 || increment > 100.0 {
            errors.push(ValidationError::Progress(format!(
                "unknown_total_increment must be in (0, 100], got {}",
                increment
            )));
        }
        if let Err(e) = GenerationBands::from_specs(&self.progress.generation_bands) {
            errors.push(ValidationError::Progress(e.to_string()));
        }

        if self.orchestrator.default_timeout_secs == 0 {
            errors.push(ValidationError::Orchestrator(
                "default_timeout_secs must be positive".to_string(),
            ));
        }
        if self.orchestrator.human_input_poll_ms == 0 {
            errors.push(ValidationError::Orchestrator(
                "human_input_poll_ms must be positive".to_string(),
            ));
        }

        for (id, workflow) in &self.workflows {
            if workflow.timeout_secs == Some(0) {
                errors.push(ValidationError::Workflow(
                    id.clone(),
                    "timeout_secs must be positive".to_string(),
                ));
            }
            if let Some(bands) = &workflow.generation_bands {
                if let Err(e) = GenerationBands::from_specs(bands) {
                    errors.push(ValidationError::Workflow(id.clone(), e.to_string()));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sessions.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.sessions.sweep_interval_secs))
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let base = OrchestratorSettings::new(
            Duration::from_secs(self.orchestrator.default_timeout_secs),
            Duration::from_millis(self.orchestrator.human_input_poll_ms),
        );
        self.workflows
            .iter()
            .filter_map(|(id, workflow)| workflow.timeout_secs.map(|secs| (id, secs)))
            .fold(base, |settings, (id, secs)| {
                settings.with_workflow_timeout(id.clone(), Duration::from_secs(secs))
            })
    }

    pub fn progress_profiles(&self) -> Result<ProgressProfiles, ProgressError> {
        let mut profiles = ProgressProfiles::new(
            GenerationBands::from_specs(&self.progress.generation_bands)?,
            self.progress.unknown_total_increment,
        );
        for (id, workflow) in &self.workflows {
            if let Some(specs) = &workflow.generation_bands {
                profiles = profiles.with_workflow(id.clone(), GenerationBands::from_specs(specs)?);
            }
        }
        Ok(profiles)
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load(e.to_string()))
    }
}

pub(crate) fn validation_failure(errors: Vec<ValidationError>) -> ConfigError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ConfigError::Invalid(messages.join("\n"))
}
