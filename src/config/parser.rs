//! Configuration parser for loading desired-state files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, HostwrightError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DesiredConfig;

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "HOSTWRIGHT_API_KEY";

/// Fallback environment variable holding the API key.
pub const LEGACY_API_KEY_VAR: &str = "GANDI_API_KEY";

/// Environment variable overriding the API endpoint.
pub const API_URL_VAR: &str = "HOSTWRIGHT_API_URL";

/// Configuration parser for loading desired state.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DesiredConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HostwrightError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HostwrightError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DesiredConfig> {
        debug!("Parsing YAML configuration");

        let config: DesiredConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HostwrightError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration: {} VMs, {} disks, {} IPs",
            config.vms.len(),
            config.disks.len(),
            config.ips.len() + config.private_ips.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `HOSTWRIGHT_<SECTION>_<KEY>` (e.g., `HOSTWRIGHT_STATE_PATH`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DesiredConfig> {
        let mut config = self.load_file(path)?;

        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DesiredConfig) {
        if let Ok(url) = std::env::var(API_URL_VAR) {
            debug!("Overriding provider.url from environment");
            config.provider.url = Some(url);
        }

        if let Some(retries) = std::env::var("HOSTWRIGHT_PROVIDER_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            debug!("Overriding provider.max_retries from environment");
            config.provider.max_retries = retries;
        }

        if let Ok(path) = std::env::var("HOSTWRIGHT_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HostwrightError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the hosting API key from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if neither key variable is set.
    pub fn get_api_key() -> Result<String> {
        std::env::var(API_KEY_VAR)
            .or_else(|_| std::env::var(LEGACY_API_KEY_VAR))
            .map_err(|_| {
                HostwrightError::Config(ConfigError::MissingEnvVar {
                    name: String::from(API_KEY_VAR),
                })
            })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["hostwright.yaml", "hostwright.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HostwrightError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
