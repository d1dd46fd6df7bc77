//! Configuration loading and config file resolution
//!
//! Configuration is a single TOML document. Every value has a built-in
//! default, so the file is optional:
//!
//! - A missing file logs a warning and falls back to defaults
//! - A file that exists but cannot be parsed is an error
//!
//! # Config file priority
//!
//! 1. Explicit path (command-line argument)
//! 2. Environment variable (`AVSYNC_CONFIG` by default)
//! 3. Platform config directory (`<config_dir>/avsync/config.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "AVSYNC_CONFIG";

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "avsync";

/// File name inside the config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level TOML document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Player tunables, interpreted by the player crate
    #[serde(default)]
    pub player: toml::Table,
}

impl TomlConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Deserialize the `[player]` table into `T`.
    ///
    /// Missing keys take `T`'s serde defaults.
    pub fn player_section<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.player.clone())
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(format!("[player] section: {}", e)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file
    File(PathBuf),
    /// No file found, built-in defaults in use
    Defaults,
}

/// Resolves and loads the config file following the priority order above.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    env_var: String,
    search_paths: Vec<PathBuf>,
}

impl ConfigResolver {
    /// Resolver using [`CONFIG_ENV_VAR`] and the platform search paths.
    pub fn new() -> Self {
        Self {
            env_var: CONFIG_ENV_VAR.to_string(),
            search_paths: platform_config_paths(),
        }
    }

    /// Override the environment variable consulted at priority 2.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = name.into();
        self
    }

    /// Replace the priority 3 search paths.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Pick the config file path, if any.
    ///
    /// Explicit and environment paths are returned even when the file does
    /// not exist (the caller reports them); search paths must exist.
    pub fn resolve_path(&self, cli_path: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config locations
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }

    /// Load configuration, falling back to defaults when no file exists.
    pub fn load(&self, cli_path: Option<&Path>) -> Result<(TomlConfig, ConfigSource)> {
        let Some(path) = self.resolve_path(cli_path) else {
            debug!("No config file found, using built-in defaults");
            return Ok((TomlConfig::default(), ConfigSource::Defaults));
        };

        if !path.exists() {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok((TomlConfig::default(), ConfigSource::Defaults));
        }

        let config = load_toml_file(&path)?;
        info!("Loaded configuration from {}", path.display());
        Ok((config, ConfigSource::File(path)))
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and parse a TOML config file.
pub fn load_toml_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    TomlConfig::from_toml_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Platform-dependent config file candidates, most specific first
fn platform_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    if cfg!(target_os = "linux") {
        paths.push(
            PathBuf::from("/etc")
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tunables {
        #[serde(default = "default_limit")]
        limit: u64,
        #[serde(default)]
        enabled: bool,
    }

    fn default_limit() -> u64 {
        42
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.player.is_empty());
    }

    #[test]
    fn test_player_section_applies_serde_defaults() {
        let config = TomlConfig::from_toml_str("[player]\nenabled = true\n").unwrap();
        let tunables: Tunables = config.player_section().unwrap();
        assert_eq!(
            tunables,
            Tunables {
                limit: 42,
                enabled: true
            }
        );
    }

    #[test]
    fn test_player_section_type_mismatch_is_config_error() {
        let config = TomlConfig::from_toml_str("[player]\nlimit = \"lots\"\n").unwrap();
        let result: Result<Tunables> = config.player_section();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_document_is_error() {
        let result = TomlConfig::from_toml_str("[logging\nlevel = ");
        assert!(matches!(result, Err(Error::TomlParse(_))));
    }
}
