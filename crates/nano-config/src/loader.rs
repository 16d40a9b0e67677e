//! Layered configuration loader.
//!
//! Layers apply in order, later ones overriding earlier ones:
//!
//! 1. Defaults or a preset
//! 2. A TOML or JSON file or string
//! 3. A `.env` file, loaded into the process environment
//! 4. The deployment variables (`OPEN_ACCESS_LOG`, `LOG_WRITER_NUM`, ...)
//! 5. Prefixed overrides (`NANO__SECTION__KEY`)

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, NanoConfig};
use nano_telemetry::config::{
    DEFAULT_ACCESS_LOG_PERCENT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITERS,
};
use nano_telemetry::StreamNames;

/// Default prefix for section overrides.
pub const DEFAULT_ENV_PREFIX: &str = "NANO";

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use nano_config::ConfigLoader;
///
/// # fn main() -> Result<(), nano_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("nano.toml")?
///     .with_dotenv()?
///     .with_deployment_env()
///     .with_env_prefix("NANO")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: NanoConfig,
    env_prefix: Option<String>,
    deployment_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: NanoConfig::default(),
            env_prefix: None,
            deployment_env: false,
        }
    }

    /// Resets to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = NanoConfig::default();
        self
    }

    /// Starts from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = NanoConfig::development();
        self
    }

    /// Starts from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = NanoConfig::production();
        self
    }

    /// Loads a `.toml` or `.json` file, replacing the current values.
    ///
    /// Sections missing from the file take their defaults.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        self.config = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration file format: {}",
                    path.display()
                )))
            }
        };
        Ok(self)
    }

    /// Loads the file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Parses configuration from a string in `toml` or `json` format.
    ///
    /// ```
    /// use nano_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nname = \"orders\"\ngroup = \"shop\"", "toml")
    ///     .unwrap()
    ///     .load_unvalidated();
    /// assert_eq!(config.server.name, "orders");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Loads `.env` from the working directory, if present.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::validation_error(format!(".env: {e}"))),
        }
    }

    /// Reads the deployment variables when loading.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OPEN_ACCESS_LOG` | `logging.access_log_percent` |
    /// | `LOG_WRITER_NUM` | `logging.writers` |
    /// | `LOG_POOL_NUM` | `logging.queue_capacity` |
    /// | `<KIND>_LOG_NAME` | `logging.streams.<kind>` |
    ///
    /// Unparsable numbers fall back to the defaults.
    #[must_use]
    pub fn with_deployment_env(mut self) -> Self {
        self.deployment_env = true;
        self
    }

    /// Reads `PREFIX__SECTION__KEY` overrides when loading.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Applies environment overrides and validates.
    pub fn load(self) -> Result<NanoConfig, ConfigError> {
        self.load_from_vars(env::vars())
    }

    /// Like [`ConfigLoader::load`], reading overrides from `vars` instead
    /// of the process environment.
    pub fn load_from_vars<I>(mut self, vars: I) -> Result<NanoConfig, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        if self.deployment_env {
            for (key, value) in &vars {
                self.apply_deployment_var(key, value);
            }
        }
        if let Some(prefix) = self.env_prefix.take() {
            let scoped = format!("{prefix}__");
            for (key, value) in &vars {
                if key.starts_with(&scoped) {
                    self.apply_env_var(key, value, &prefix)?;
                }
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> NanoConfig {
        self.config
    }

    fn apply_deployment_var(&mut self, key: &str, value: &str) {
        let logging = &mut self.config.logging;
        let value = value.trim();
        match key {
            "OPEN_ACCESS_LOG" => {
                logging.access_log_percent = value.parse().unwrap_or(DEFAULT_ACCESS_LOG_PERCENT);
            }
            "LOG_WRITER_NUM" => {
                logging.writers = value.parse().unwrap_or(DEFAULT_WRITERS);
            }
            "LOG_POOL_NUM" => {
                logging.queue_capacity = value.parse().unwrap_or(DEFAULT_QUEUE_CAPACITY);
            }
            _ => {
                if let Some(slot) = stream_slot(&mut logging.streams, key) {
                    if !value.is_empty() {
                        *slot = value.to_string();
                    }
                }
            }
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "NAME"] => config.server.name = value.to_string(),
            ["SERVER", "GROUP"] => config.server.group = value.to_string(),
            ["SERVER", "TITLE"] => config.server.title = value.to_string(),
            ["SERVER", "DEBUG"] => {
                config.server.debug = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["LOGGING", "ACCESS_LOG_PERCENT"] => {
                config.logging.access_log_percent = parse_int(key, value)?;
            }
            ["LOGGING", "WRITERS"] => config.logging.writers = parse_int(key, value)?,
            ["LOGGING", "QUEUE_CAPACITY"] => {
                config.logging.queue_capacity = parse_int(key, value)?;
            }
            ["LOGGING", "STREAMS", stream] => {
                let name = format!("{stream}_LOG_NAME");
                let slot = stream_slot(&mut config.logging.streams, &name)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "unknown stream"))?;
                *slot = value.to_string();
            }

            ["TELEMETRY", "ENABLED"] => {
                config.telemetry.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LEVEL"] => config.telemetry.level = value.to_string(),
            ["TELEMETRY", "FORMAT"] => {
                config.telemetry.json_format = match value.to_lowercase().as_str() {
                    "json" => true,
                    "pretty" => false,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "SPAN_EVENTS"] => {
                config.telemetry.span_events = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            _ => {}
        }
        Ok(())
    }
}

fn stream_slot<'a>(streams: &'a mut StreamNames, key: &str) -> Option<&'a mut String> {
    match key {
        "ERROR_LOG_NAME" => Some(&mut streams.error),
        "ACCESS_LOG_NAME" => Some(&mut streams.access),
        "WARN_LOG_NAME" => Some(&mut streams.warn),
        "MYSQL_LOG_NAME" => Some(&mut streams.mysql),
        "REDIS_LOG_NAME" => Some(&mut streams.redis),
        "ASYNC_LOG_NAME" => Some(&mut streams.async_jobs),
        "SUBSCRIBE_LOG_NAME" => Some(&mut streams.subscribe),
        "REQUEST_LOG_NAME" => Some(&mut streams.request),
        _ => None,
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
