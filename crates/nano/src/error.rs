//! Application errors.

use nano_config::ConfigError;
use nano_core::CoreError;
use nano_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while starting, reconfiguring or using an [`App`](crate::App).
#[derive(Error, Debug)]
pub enum NanoError {
    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The log pipeline could not be started or reconfigured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Registry or context misuse.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for application operations.
pub type NanoResult<T> = Result<T, NanoError>;
