//! Configuration management for mediaopt.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! a project `.env` file, then environment variables. The CLI applies its own
//! flags on top and re-validates.

mod env;
mod types;
mod validate;

pub use env::load_dotenv;
pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for mediaopt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source roots and output location
    pub general: GeneralConfig,

    /// Extension classification
    pub scan: ScanConfig,

    /// Worker pool settings
    pub processing: ProcessingConfig,

    /// Image recompression settings
    pub image: ImageConfig,

    /// Video transcoding settings
    pub video: VideoConfig,

    /// Optional remote compression pass
    pub compression: CompressionConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location, the project `.env` and
    /// the environment.
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layered(None)
    }

    /// Load configuration, reading `explicit` instead of the default config
    /// file when given. An explicit path that does not exist is an error.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::read_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::read_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        load_dotenv(&config.project_dir());
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file, without environment
    /// overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.mediaopt.mediaopt/config.toml
    /// - Linux: ~/.config/mediaopt/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\mediaopt\config\config.toml
    ///
    /// Falls back to ~/.mediaopt/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "mediaopt", "mediaopt")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".mediaopt").join("config.toml")
            })
    }

    /// Get the project directory (with ~ expansion).
    pub fn project_dir(&self) -> PathBuf {
        expand(&self.general.project_dir)
    }

    /// Source roots resolved against the project directory.
    pub fn source_roots(&self) -> Vec<PathBuf> {
        let project = self.project_dir();
        self.general
            .source_roots
            .iter()
            .map(|root| project.join(expand(root)))
            .collect()
    }

    /// Output root resolved against the project directory.
    pub fn output_dir(&self) -> PathBuf {
        self.project_dir().join(expand(&self.general.output_dir))
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Tilde-expand a path. Absolute results make `Path::join` discard the base.
fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}
