use std::path::{Path, PathBuf};

use config::File;

use crate::config::merge::builder_with_defaults;
use crate::config::sources::{environment, global_file, project_file};
use crate::config::{validation_failure, ServiceConfig};
use crate::error::ConfigError;

/// Builds a validated [`ServiceConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a project rooted at `root`.
    ///
    /// Precedence (lowest to highest): defaults, global file, `config/config.toml`,
    /// `config/{FLOWRELAY_ENV}.toml`, `FLOWRELAY__*` environment variables.
    pub fn load(root: &Path) -> Result<ServiceConfig, ConfigError> {
        let builder = builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = project_file::add_to_builder(builder, root)?;
        let builder = environment::add_to_builder(builder);

        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(validation_failure)?;
        Ok(config)
    }

    /// Load configuration from a single TOML file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config: ServiceConfig = builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate().map_err(validation_failure)?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
