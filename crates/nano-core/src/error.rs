//! Error types for nano services.
//!
//! Two families live here:
//!
//! - [`ServerError`] is a *declared* domain error. Each one is identified by
//!   its message, which doubles as the key in the [`ErrorRegistry`].
//! - [`CoreError`] covers misuse of the core API itself.
//!
//! # Built-in errors
//!
//! | message | code | status |
//! |---|---|---|
//! | `unknow_error` | 10000 | 400 |
//! | `project_validator_error` | 10002 | 400 |
//! | `project_match_error` | 10003 | 400 |
//! | `not_found` | 10004 | 404 |
//! | `no_method` | 10005 | 405 |
//! | `doc_not_found` | 10006 | 404 |
//! | `undefined_error` | 10007 | 400 |
//! | `requests_error` | 10008 | 400 |
//! | `get_request_host_error` | 10009 | 400 |
//!
//! Code `10001` is reserved for failures that match no declared error.

use http::StatusCode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The caller passed arguments the API cannot accept.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// A different descriptor is already registered under this message.
    #[error("error '{message}' is already registered with code {existing_code}")]
    DuplicateError {
        /// The conflicting message.
        message: String,
        /// Code of the descriptor already in the registry.
        existing_code: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a duplicate-registration error.
    #[must_use]
    pub fn duplicate(message: impl Into<String>, existing_code: impl Into<String>) -> Self {
        Self::DuplicateError {
            message: message.into(),
            existing_code: existing_code.into(),
        }
    }
}

/// Messages of the built-in errors.
pub mod messages {
    /// Fallback for anything not otherwise declared.
    pub const UNKNOWN: &str = "unknow_error";
    /// Project validation failed.
    pub const PROJECT_VALIDATOR: &str = "project_validator_error";
    /// Caller project does not match.
    pub const PROJECT_MATCH: &str = "project_match_error";
    /// No route matched.
    pub const NOT_FOUND: &str = "not_found";
    /// Route matched but the method did not.
    pub const NO_METHOD: &str = "no_method";
    /// Documentation page missing.
    pub const DOC_NOT_FOUND: &str = "doc_not_found";
    /// Undefined request.
    pub const UNDEFINED: &str = "undefined_error";
    /// Outbound request failed.
    pub const REQUESTS: &str = "requests_error";
    /// Host lookup for an outbound request failed.
    pub const GET_REQUEST_HOST: &str = "get_request_host_error";
}

/// Code reported for failures that match no declared error.
pub const UNCLASSIFIED_CODE: &str = "10001";

const BUILTIN: [(&str, &str, u16); 9] = [
    (messages::UNKNOWN, "10000", 400),
    (messages::PROJECT_VALIDATOR, "10002", 400),
    (messages::PROJECT_MATCH, "10003", 400),
    (messages::NOT_FOUND, "10004", 404),
    (messages::NO_METHOD, "10005", 405),
    (messages::DOC_NOT_FOUND, "10006", 404),
    (messages::UNDEFINED, "10007", 400),
    (messages::REQUESTS, "10008", 400),
    (messages::GET_REQUEST_HOST, "10009", 400),
];

/// A declared domain error.
///
/// The descriptor in the registry is never mutated; per-request details are
/// attached to a copy with [`ServerError::with_details`].
///
/// # Example
///
/// ```
/// use nano_core::ServerError;
///
/// let err = ServerError::not_found().with_details(vec!["/users/9".into()]);
/// assert_eq!(err.code, "10004");
/// assert_eq!(err.to_string(), "not_found : /users/9");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(skip)]
    status: StatusCode,
    /// Machine-readable error code.
    pub code: String,
    /// Message, also the registry key.
    pub msg: String,
    /// Per-request details.
    pub details: Vec<String>,
}

impl ServerError {
    /// Creates a descriptor. It is not registered until passed to
    /// [`ErrorRegistry::register`].
    #[must_use]
    pub fn new(msg: impl Into<String>, code: impl Into<String>, status: StatusCode) -> Self {
        Self {
            status,
            code: code.into(),
            msg: msg.into(),
            details: Vec::new(),
        }
    }

    fn builtin(msg: &str) -> Self {
        BUILTIN
            .iter()
            .find(|(m, _, _)| *m == msg)
            .map(|(m, code, status)| {
                Self::new(
                    *m,
                    *code,
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                )
            })
            .unwrap_or_else(|| Self::new(msg, "10000", StatusCode::BAD_REQUEST))
    }

    /// The `unknow_error` descriptor.
    #[must_use]
    pub fn unknown() -> Self {
        Self::builtin(messages::UNKNOWN)
    }

    /// The `project_validator_error` descriptor.
    #[must_use]
    pub fn project_validator() -> Self {
        Self::builtin(messages::PROJECT_VALIDATOR)
    }

    /// The `project_match_error` descriptor.
    #[must_use]
    pub fn project_match() -> Self {
        Self::builtin(messages::PROJECT_MATCH)
    }

    /// The `not_found` descriptor.
    #[must_use]
    pub fn not_found() -> Self {
        Self::builtin(messages::NOT_FOUND)
    }

    /// The `no_method` descriptor.
    #[must_use]
    pub fn no_method() -> Self {
        Self::builtin(messages::NO_METHOD)
    }

    /// The `doc_not_found` descriptor.
    #[must_use]
    pub fn doc_not_found() -> Self {
        Self::builtin(messages::DOC_NOT_FOUND)
    }

    /// The `undefined_error` descriptor.
    #[must_use]
    pub fn undefined() -> Self {
        Self::builtin(messages::UNDEFINED)
    }

    /// The `requests_error` descriptor.
    #[must_use]
    pub fn requests() -> Self {
        Self::builtin(messages::REQUESTS)
    }

    /// The `get_request_host_error` descriptor.
    #[must_use]
    pub fn get_request_host() -> Self {
        Self::builtin(messages::GET_REQUEST_HOST)
    }

    /// Returns every built-in descriptor.
    #[must_use]
    pub fn builtins() -> Vec<Self> {
        BUILTIN.iter().map(|(msg, _, _)| Self::builtin(msg)).collect()
    }

    /// Returns a copy carrying `details`.
    #[must_use]
    pub fn with_details(&self, details: Vec<String>) -> Self {
        Self {
            details,
            ..self.clone()
        }
    }

    /// Returns a copy carrying `details` and a replacement code.
    #[must_use]
    pub fn with_details_and_code(&self, details: Vec<String>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            details,
            ..self.clone()
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns `true` if the descriptor fields (status, code, message) match.
    #[must_use]
    pub fn same_descriptor(&self, other: &Self) -> bool {
        self.status == other.status && self.code == other.code && self.msg == other.msg
    }

    /// Converts this error into the response envelope.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: self.status.as_u16(),
            code: self.code.clone(),
            msg: self.msg.clone(),
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            f.write_str(&self.msg)
        } else {
            write!(f, "{} : {}", self.msg, self.details.join(", "))
        }
    }
}

impl std::error::Error for ServerError {}

/// Serializable error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// HTTP status (also mapped onto RPC status by the transport).
    pub status: u16,
    /// Machine-readable error code.
    pub code: String,
    /// Error message.
    pub msg: String,
    /// Per-request details.
    #[serde(default)]
    pub details: Vec<String>,
}

impl ErrorEnvelope {
    /// Returns the status as an [`http::StatusCode`].
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST)
    }
}

/// Registry of declared errors, keyed by message.
///
/// Append-only: descriptors can be added but never replaced or removed.
/// The built-ins are present from construction.
#[derive(Debug)]
pub struct ErrorRegistry {
    entries: RwLock<HashMap<String, ServerError>>,
}

impl ErrorRegistry {
    /// Creates a registry holding the built-in errors.
    #[must_use]
    pub fn new() -> Self {
        let entries = ServerError::builtins()
            .into_iter()
            .map(|err| (err.msg.clone(), err))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Registers a descriptor and returns it.
    ///
    /// The descriptor is stored as given, details included. Registering a
    /// descriptor identical to the existing one (details aside) is a no-op.
    /// A different descriptor under an existing message fails with
    /// [`CoreError::DuplicateError`].
    pub fn register(&self, error: ServerError) -> CoreResult<ServerError> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&error.msg) {
            if existing.same_descriptor(&error) {
                return Ok(existing.clone());
            }
            return Err(CoreError::duplicate(&error.msg, &existing.code));
        }
        tracing::debug!(msg = %error.msg, code = %error.code, "registered error");
        entries.insert(error.msg.clone(), error.clone());
        Ok(error)
    }

    /// Looks up a descriptor by message.
    #[must_use]
    pub fn lookup(&self, msg: &str) -> Option<ServerError> {
        self.entries.read().get(msg).cloned()
    }

    /// Returns `true` if `msg` is registered.
    #[must_use]
    pub fn contains(&self, msg: &str) -> bool {
        self.entries.read().contains_key(msg)
    }

    /// Returns the registered `unknow_error` descriptor.
    #[must_use]
    pub fn unknown(&self) -> ServerError {
        self.lookup(messages::UNKNOWN)
            .unwrap_or_else(ServerError::unknown)
    }

    /// Returns the number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
