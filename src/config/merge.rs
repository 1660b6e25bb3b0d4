//! Merge rules: defaults first, later sources override earlier ones key by key.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the built-in defaults applied.
///
/// Generation bands are a list of tables and come from serde defaults instead.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("logging.enabled", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")?
        .set_default("sessions.shard_count", 16)?
        .set_default("sessions.idle_timeout_secs", 1800)?
        .set_default("sessions.sweep_interval_secs", 60)?
        .set_default("sessions.on_conflict", "replace")?
        .set_default("progress.unknown_total_increment", 2.0)?
        .set_default("orchestrator.default_timeout_secs", 600)?
        .set_default("orchestrator.human_input_poll_ms", 50)
}
