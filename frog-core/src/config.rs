//! # Configuration
//!
//! Process-level settings: where schema artifacts are written and how large a message the gRPC
//! transport accepts. Settings come from a JSON file, from environment variables, or both.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides [`FrogConfig::proto_dir`].
pub const PROTO_DIR_VAR: &str = "FROG_PROTO_DIR";
/// Overrides [`FrogConfig::max_message_length`].
pub const MAX_MESSAGE_LENGTH_VAR: &str = "FROG_MAX_MESSAGE_LENGTH";

/// Default send and receive limit: 512 MiB.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid value '{value}' for {var}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FrogConfig {
    /// Directory receiving `<service>.proto` and the compiled `<service>.bin`.
    pub proto_dir: PathBuf,
    /// Maximum encoded message size, in bytes, for both directions.
    pub max_message_length: usize,
}

impl Default for FrogConfig {
    fn default() -> Self {
        Self {
            proto_dir: PathBuf::from("proto"),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl FrogConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_vars(|var| std::env::var(var).ok())
    }

    /// Reads a JSON config file. Missing keys take their default value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides from a variable lookup, such as the process environment.
    pub fn with_vars(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup(PROTO_DIR_VAR).filter(|v| !v.is_empty()) {
            self.proto_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup(MAX_MESSAGE_LENGTH_VAR).filter(|v| !v.is_empty()) {
            self.max_message_length = value.trim().parse().map_err(|_| ConfigError::InvalidVar {
                var: MAX_MESSAGE_LENGTH_VAR,
                value,
            })?;
        }

        Ok(self)
    }
}
