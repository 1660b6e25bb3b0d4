//! Project config file source: <root>/config/config.toml and <root>/config/{env}.toml

use std::path::Path;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};

pub const ENV_NAME_VAR: &str = "FLOWRELAY_ENV";

/// Add project config files to builder.
/// Precedence: config/config.toml (base) then config/{FLOWRELAY_ENV}.toml.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = root.join("config");
    let env_name = std::env::var(ENV_NAME_VAR).unwrap_or_else(|_| "development".to_string());

    for path in [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ] {
        if path.exists() {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
    }
    Ok(builder)
}
