//! Failure classification.
//!
//! Everything that escapes a handler, whether returned or thrown as a
//! panic, is turned into exactly one [`Failure`]. The recovery boundaries
//! build responses and log records from that value alone.

use crate::error::{ErrorRegistry, ServerError, UNCLASSIFIED_CODE};
use http::StatusCode;
use std::any::Any;
use std::backtrace::Backtrace;
use thiserror::Error;

/// Maximum number of frames kept in a captured stack.
pub const MAX_STACK_FRAMES: usize = 32;

/// Error returned by handlers.
///
/// # Example
///
/// ```
/// use nano_core::{HandlerError, ServerError};
///
/// fn load() -> Result<(), HandlerError> {
///     Err(ServerError::project_validator().into())
/// }
/// assert!(load().is_err());
/// ```
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A declared domain error.
    #[error(transparent)]
    Domain(#[from] ServerError),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Wraps any error as [`HandlerError::Other`].
    pub fn other(error: impl Into<anyhow::Error>) -> Self {
        Self::Other(error.into())
    }
}

/// Log severity of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Declared errors: expected outcomes, logged to the warn stream.
    Warn,
    /// Everything else, logged to the error stream.
    Error,
}

/// The classified outcome of a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The handler raised a declared [`ServerError`].
    Declared(ServerError),

    /// A generic error whose message names a registered descriptor.
    Registered(ServerError),

    /// Any other error.
    Unclassified {
        /// The error message.
        message: String,
        /// Stack captured at classification time.
        stack: String,
    },

    /// A panic with a text payload, or an unrecognized payload.
    StringPanic(String),
}

impl Failure {
    /// Classifies an error returned by a handler.
    #[must_use]
    pub fn from_error(error: HandlerError, registry: &ErrorRegistry) -> Self {
        match error {
            HandlerError::Domain(err) => Self::Declared(err),
            HandlerError::Other(err) => match err.downcast::<ServerError>() {
                Ok(err) => Self::Declared(err),
                Err(err) => Self::from_message(err.to_string(), registry),
            },
        }
    }

    /// Classifies a panic payload caught at a recovery boundary.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>, registry: &ErrorRegistry) -> Self {
        let payload = match payload.downcast::<ServerError>() {
            Ok(err) => return Self::Declared(*err),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<HandlerError>() {
            Ok(err) => return Self::from_error(*err, registry),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<anyhow::Error>() {
            Ok(err) => return Self::from_error(HandlerError::Other(*err), registry),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
            Ok(err) => return Self::from_message(err.to_string(), registry),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(text) => return Self::StringPanic(*text),
            Err(payload) => payload,
        };
        match payload.downcast::<&'static str>() {
            Ok(text) => Self::StringPanic((*text).to_string()),
            Err(_) => Self::StringPanic(registry.unknown().msg),
        }
    }

    fn from_message(message: String, registry: &ErrorRegistry) -> Self {
        match registry.lookup(&message) {
            Some(descriptor) => Self::Registered(descriptor),
            None => Self::Unclassified {
                message,
                stack: capture_stack(),
            },
        }
    }

    /// Returns the stream severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Declared(_) | Self::Registered(_) => Severity::Warn,
            Self::Unclassified { .. } | Self::StringPanic(_) => Severity::Error,
        }
    }

    /// Returns the code written to the log record.
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::Declared(err) | Self::Registered(err) => err.code.clone(),
            Self::Unclassified { .. } => UNCLASSIFIED_CODE.to_string(),
            Self::StringPanic(_) => ServerError::unknown().code,
        }
    }

    /// Returns the reason written to the log record.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Declared(err) | Self::Registered(err) => err.to_string(),
            Self::Unclassified { message, stack } => {
                format!("[Recovery] panic recovered:\n{message}\n{stack}")
            }
            Self::StringPanic(text) => text.clone(),
        }
    }

    /// Builds the error returned to the caller.
    ///
    /// In debug mode an unclassified failure is reported verbatim with code
    /// `10001`; otherwise it is masked as `unknow_error`.
    #[must_use]
    pub fn to_response(&self, registry: &ErrorRegistry, debug: bool) -> ServerError {
        match self {
            Self::Declared(err) | Self::Registered(err) => err.clone(),
            Self::Unclassified { .. } if debug => {
                ServerError::new(self.reason(), UNCLASSIFIED_CODE, StatusCode::BAD_REQUEST)
            }
            Self::Unclassified { .. } => registry.unknown(),
            Self::StringPanic(text) => registry.unknown().with_details(vec![text.clone()]),
        }
    }
}

/// Captures the current stack, keeping at most [`MAX_STACK_FRAMES`] frames.
#[must_use]
pub fn capture_stack() -> String {
    let trace = Backtrace::force_capture().to_string();
    let mut frames = 0;
    let mut out = String::with_capacity(trace.len().min(8 * 1024));
    for line in trace.lines() {
        if is_frame_header(line) {
            frames += 1;
            if frames > MAX_STACK_FRAMES {
                out.push_str("      ...\n");
                break;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn is_frame_header(line: &str) -> bool {
    let line = line.trim_start();
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && line[digits..].starts_with(':')
}
