//! Engine configuration
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (modules.toml)
//! - Environment variables (SCHEMA_MODULES__*)
//!
//! ## Example config file (modules.toml):
//! ```toml
//! [build]
//! parallelism = 8
//! exclude_imports = false
//!
//! [lock]
//! file_name = "modules.lock"
//! file_version = "v2"
//! format = "yaml"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::exec::default_parallelism;
use crate::lock_file::{FileVersion, LockFormat, DEFAULT_LOCK_FILE_NAME};

/// Main configuration for module resolution and image builds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Image build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Lock file settings
    #[serde(default)]
    pub lock: LockConfig,
}

/// Image build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum concurrent file reads and parses
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Drop import-only files from built images
    #[serde(default)]
    pub exclude_imports: bool,
}

/// Lock file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// File name within the module directory
    #[serde(default = "default_lock_file_name")]
    pub file_name: String,

    /// Version used for newly written lock files
    #[serde(default)]
    pub file_version: FileVersion,

    /// Encoding used for newly written lock files
    #[serde(default)]
    pub format: LockFormat,
}

fn default_lock_file_name() -> String {
    DEFAULT_LOCK_FILE_NAME.to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            exclude_imports: false,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            file_name: default_lock_file_name(),
            file_version: FileVersion::default(),
            format: LockFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering `config_path` over the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["modules.toml", ".modules.toml", "config/modules.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        let project_dirs =
            directories::ProjectDirs::from("dev", "schema-modules", "schema-modules");
        if let Some(config_dir) = project_dirs {
            let xdg_config = config_dir.config_dir().join("modules.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SCHEMA_MODULES__BUILD__PARALLELISM=4
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_MODULES")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.build.parallelism = config.build.parallelism.max(1);
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
