//! Server configuration file
//!
//! Loads listener and protocol settings from a TOML file such as:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 9000
//! malformed_frames = "disconnect"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::server::MalformedFramePolicy;

/// Default configuration file name
pub const CONFIG_FILE: &str = "poker.toml";

/// Default bind address
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default listening port
pub const DEFAULT_PORT: u16 = 9000;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings read from the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// What to do with text frames that are not valid messages
    pub malformed_frames: MalformedFramePolicy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            malformed_frames: MalformedFramePolicy::default(),
        }
    }
}

impl FileConfig {
    /// Load configuration from a file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
