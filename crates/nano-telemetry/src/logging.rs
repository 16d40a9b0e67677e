//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an env filter and a JSON
//! or pretty formatter. [`TracingSink`](crate::sink::TracingSink) records
//! flow through the same subscriber under the `nano::sink` target.
//!
//! # Example
//!
//! ```rust,ignore
//! use nano_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(requestId = "abc", "Serving request");
//! ```

use crate::config::ServerIdentity;
use crate::error::TelemetryError;
use crate::TelemetryResult;
use nano_core::RequestContext;
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "nano=debug,hyper=warn").
    pub level: String,

    /// Whether to output JSON.
    pub json_format: bool,

    /// Whether to include span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread names.
    pub thread_names: bool,

    /// Whether to include the target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            thread_names: true,
            include_target: true,
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            thread_names: false,
            include_target: true,
        }
    }
}

/// Initializes the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` for an invalid filter or when a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_names(config.thread_names)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_names(config.thread_names)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Parses a filter directive.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Opens a span carrying the request fields, so application logs written
/// while serving a request can be correlated with its access record.
#[must_use]
pub fn request_span(identity: &ServerIdentity, ctx: &RequestContext) -> Span {
    tracing::info_span!(
        "request",
        "logServer" = %identity.name,
        "logServerGroup" = %identity.group,
        "requestType" = %ctx.request_type(),
        "requestFunc" = %ctx.function_name(),
        "fromApp" = %ctx.caller_name(),
        "fromProject" = %ctx.caller_group(),
        "requestId" = %ctx.request_id(),
        "clientIp" = %ctx.client_ip(),
    )
}

/// Field names written by every sink.
pub mod fields {
    /// Record type.
    pub const LOG_TYPE: &str = "log_type";
    /// `<group>_<name>_<suffix>`.
    pub const EVENT: &str = "event";
    /// Local service name.
    pub const LOG_SERVER: &str = "logServer";
    /// Local service group.
    pub const LOG_SERVER_GROUP: &str = "logServerGroup";
    /// Request kind.
    pub const REQUEST_TYPE: &str = "requestType";
    /// Function served.
    pub const REQUEST_FUNC: &str = "requestFunc";
    /// Calling service name.
    pub const FROM_APP: &str = "fromApp";
    /// Calling service group.
    pub const FROM_PROJECT: &str = "fromProject";
    /// Request id.
    pub const REQUEST_ID: &str = "requestId";
    /// Client address.
    pub const CLIENT_IP: &str = "clientIp";
    /// Client user agent.
    pub const USER_AGENT: &str = "user-agent";
    /// Duration in seconds.
    pub const TIME: &str = "time";
    /// Error code.
    pub const ERROR_CODE: &str = "error_code";
    /// Failure reason.
    pub const REASON: &str = "reason";
    /// Stringified request payload.
    pub const QUERY: &str = "query";
}
