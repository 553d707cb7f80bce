//! Configuration file loading and management
//!
//! This module handles loading and parsing the CLI configuration from
//! `$XDG_CONFIG_HOME/luau-bridge/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use luau_bridge_core::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Options for every script session
    #[serde(default)]
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "warn"
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/luau-bridge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "luau-bridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# luau-bridge configuration

[log]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "warn"
level = "warn"

[session]
# Make the standard libraries and globals read-only once host globals
# have been injected.
# Default: true
sandbox = true

# Chunk name used in error locations. A leading "=" is shown verbatim.
# Default: "=stdin"
chunk_name = "=stdin"

# Append a stack backtrace to script errors.
# Default: true
traceback = true

# Luau compiler options (0-2).
# Default: 1
optimization_level = 1
debug_level = 1
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.log.level,
                valid_log_levels.join(", ")
            );
        }

        self.session
            .validate()
            .context("Invalid [session] configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.session, SessionConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_content_parses_to_defaults() {
        let config: Config = toml::from_str(&Config::default_config_content()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[log]
level = "debug"

[session]
sandbox = false
chunk_name = "=main"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(!config.session.sandbox);
        assert_eq!(config.session.chunk_name, "=main");
        assert!(config.session.traceback);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[session]\ntraceback = false\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log.level, "warn");
        assert!(!config.session.traceback);
        assert!(config.session.sandbox);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[log]\nlevel = \"loud\"\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_invalid_session_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[session]\noptimization_level = 7\n").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_create_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::create_default_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
