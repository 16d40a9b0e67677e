//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur in the log pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A sink could not open the named stream.
    #[error("Log stream '{stream}' unavailable: {reason}")]
    SinkUnavailable {
        /// Stream name.
        stream: String,
        /// Why it could not be opened.
        reason: String,
    },

    /// Writing a record to an open stream failed.
    #[error("Failed to write to log stream '{stream}': {reason}")]
    Emit {
        /// Stream name.
        stream: String,
        /// Underlying failure.
        reason: String,
    },

    /// The dispatch queue no longer accepts records.
    #[error("Log queue is closed")]
    QueueClosed,

    /// No writer thread could be started for a dispatch generation.
    #[error("No log writer started for dispatch generation {generation}")]
    NoWriters {
        /// Generation that failed to start.
        generation: u64,
    },

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Failed to install the metrics recorder.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Creates a sink-unavailable error.
    #[must_use]
    pub fn sink_unavailable(stream: impl Into<String>, reason: impl ToString) -> Self {
        Self::SinkUnavailable {
            stream: stream.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an emit error.
    #[must_use]
    pub fn emit(stream: impl Into<String>, reason: impl ToString) -> Self {
        Self::Emit {
            stream: stream.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::sink_unavailable("access", "permission denied");
        assert_eq!(
            err.to_string(),
            "Log stream 'access' unavailable: permission denied"
        );
        assert_eq!(TelemetryError::QueueClosed.to_string(), "Log queue is closed");
    }
}
