//! Session configuration.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Options applied when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Make library tables and the global table read-only after the
    /// environment has been injected.
    /// Default: true
    pub sandbox: bool,
    /// Chunk name for sources run through `exec`. A leading `=` is used
    /// verbatim in error locations.
    /// Default: "=stdin"
    pub chunk_name: String,
    /// Append the failing thread's stack traceback to script errors.
    /// Default: true
    pub traceback: bool,
    /// Luau optimization level (0-2).
    /// Default: 1
    pub optimization_level: u8,
    /// Luau debug level (0-2).
    /// Default: 1
    pub debug_level: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sandbox: true,
            chunk_name: "=stdin".to_string(),
            traceback: true,
            optimization_level: 1,
            debug_level: 1,
        }
    }
}

impl SessionConfig {
    /// Parse from a TOML string.
    pub fn from_str(content: &str) -> BridgeResult<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.chunk_name.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "chunk_name must not be empty".to_string(),
            ));
        }
        if self.optimization_level > 2 {
            return Err(BridgeError::InvalidConfig(format!(
                "optimization_level must be 0-2, got {}",
                self.optimization_level
            )));
        }
        if self.debug_level > 2 {
            return Err(BridgeError::InvalidConfig(format!(
                "debug_level must be 0-2, got {}",
                self.debug_level
            )));
        }
        Ok(())
    }
}
