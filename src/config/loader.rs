//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate, later sources overriding earlier ones:
//!
//! 1. `{dir}/curator.toml` (required)
//! 2. `{dir}/environments/{env}.toml` (optional)
//! 3. `CURATOR__SECTION__KEY` environment variables

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::CuratorConfig;

const BASE_FILE: &str = "curator.toml";
const ENV_PREFIX: &str = "CURATOR";
const CONFIG_DIR_VAR: &str = "CURATOR_CONFIG_DIR";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CuratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            broker = %Self::sanitize_address(&config.broker.default_address),
            listen_queue = %config.broker.listen_queue,
            stages = config.conveyor.stages.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: CuratorConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with broker credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut config = self.config.clone();
        config.broker.default_address = Self::sanitize_address(&config.broker.default_address);
        serde_json::to_value(&config).unwrap_or(serde_json::Value::Null)
    }

    /// `CURATOR_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        env::var(CONFIG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<CuratorConfig> {
        let base_path = config_directory.join(BASE_FILE);
        if !base_path.is_file() {
            return Err(ConfigurationError::config_file_not_found(vec![base_path]));
        }

        let environment_path = config_directory
            .join("environments")
            .join(format!("{environment}.toml"));
        if environment_path.is_file() {
            debug!(path = %environment_path.display(), "Applying environment overrides");
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(base_path.as_path()).required(true))
            .add_source(::config::File::from(environment_path.as_path()).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Self::map_config_error(&base_path, environment, e))?;

        settings
            .try_deserialize::<CuratorConfig>()
            .map_err(|e| ConfigurationError::parse_error(environment, e))
    }

    fn map_config_error(
        base_path: &Path,
        environment: &str,
        error: ::config::ConfigError,
    ) -> ConfigurationError {
        match error {
            ::config::ConfigError::Foreign(e) => {
                ConfigurationError::file_read_error(base_path.display().to_string(), e)
            }
            other => ConfigurationError::parse_error(environment, other),
        }
    }

    /// Hide the userinfo part of URL-style broker addresses
    pub fn sanitize_address(address: &str) -> String {
        match (address.find("://"), address.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &address[..scheme_end], &address[at + 1..])
            }
            _ => address.to_string(),
        }
    }
}
