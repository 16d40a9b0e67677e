//! Configuration types.

use crate::ConfigError;
use nano_telemetry::logging::create_env_filter;
use nano_telemetry::{LogConfig, PipelineConfig, ServerIdentity};
use serde::{Deserialize, Serialize};

/// Complete service configuration.
///
/// # Example
///
/// ```
/// use nano_config::NanoConfig;
///
/// let config = NanoConfig::default();
/// assert_eq!(config.logging.writer_count(), 4);
/// assert_eq!(config.identity().event("access"), "nano_nano_access");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct NanoConfig {
    /// Service identity and mode.
    #[serde(default)]
    pub server: ServerSection,

    /// Request log pipeline.
    #[serde(default)]
    pub logging: PipelineConfig,

    /// Diagnostic logging.
    #[serde(default)]
    pub telemetry: LogConfig,
}

/// Service identity and mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Service name, stamped on every record as `logServer`.
    pub name: String,

    /// Service group, stamped as `logServerGroup`.
    pub group: String,

    /// Human-readable title.
    pub title: String,

    /// Report unclassified failures verbatim instead of masking them.
    pub debug: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "nano".to_string(),
            group: "nano".to_string(),
            title: String::new(),
            debug: false,
        }
    }
}

impl NanoConfig {
    /// Debug mode with human-readable diagnostics.
    #[must_use]
    pub fn development() -> Self {
        Self {
            server: ServerSection {
                debug: true,
                ..ServerSection::default()
            },
            logging: PipelineConfig::default(),
            telemetry: LogConfig::development(),
        }
    }

    /// Masked failures with JSON diagnostics.
    #[must_use]
    pub fn production() -> Self {
        Self {
            server: ServerSection::default(),
            logging: PipelineConfig::default(),
            telemetry: LogConfig::production(),
        }
    }

    /// Returns the identity stamped on log records.
    #[must_use]
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new(&self.server.name, &self.server.group)
    }

    /// Validates the configuration.
    ///
    /// Pipeline sizes are clamped when read and never rejected here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name("server.name", &self.server.name)?;
        validate_name("server.group", &self.server.group)?;

        if self.telemetry.enabled {
            create_env_filter(&self.telemetry.level).map_err(|e| {
                ConfigError::invalid_value("telemetry.level", e.to_string())
            })?;
        }

        let streams = &self.logging.streams;
        for (field, value) in [
            ("logging.streams.error", &streams.error),
            ("logging.streams.access", &streams.access),
            ("logging.streams.warn", &streams.warn),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid_value(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

// Names end up in event and stream names.
fn validate_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::invalid_value(field, "must not be empty"));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '\\')
    {
        return Err(ConfigError::invalid_value(
            field,
            format!("'{value}' must not contain whitespace or path separators"),
        ));
    }
    Ok(())
}
