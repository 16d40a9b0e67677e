//! Request context types.
//!
//! A [`RequestContext`] is an immutable snapshot of request metadata. Every
//! append produces a new snapshot that shares nothing mutable with its
//! parent, so log writers on other threads can keep reading an older
//! snapshot while the request moves on.

use crate::error::{CoreError, CoreResult};
use crate::metadata::{self, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Recognized context keys.
///
/// The context reuses the transport metadata key names so a value can be
/// copied between the two without translation.
pub mod keys {
    /// Kind of request being served (`rest`, `grpc`, `jrpc`, `tcp`).
    pub const REQUEST_TYPE: &str = "Nano-Request-Type";
    /// Name of the function or route being served.
    pub const REQUEST_FUNC: &str = "Nano-Request-Func";
    /// Opaque request payload, stringified for error logs.
    pub const REQUEST_INFO: &str = "Nano-Request-Info";
    /// Correlation id for the call chain.
    pub const REQUEST_ID: &str = "Nano-Request-ID";
    /// Name of the calling service.
    pub const SERVER_NAME: &str = "Nano-Server-Name";
    /// Group (project) of the calling service.
    pub const SERVER_GROUP: &str = "Nano-Server-Group";
    /// Resolved address of the original client.
    pub const CONTEXT_IP: &str = "Nano-Context-IP";
    /// Client user agent.
    pub const USER_AGENT: &str = "User-Agent";
}

/// A generated request identifier, using UUID v7.
///
/// Inbound ids are kept as plain strings since upstream callers are free to
/// use any format; `RequestId` is only used when one has to be minted.
///
/// # Example
///
/// ```
/// use nano_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of surface a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// HTTP/REST.
    Rest,
    /// gRPC unary call.
    #[default]
    Grpc,
    /// JSON-RPC.
    Jrpc,
    /// Raw TCP.
    Tcp,
}

impl RequestType {
    /// Returns the name reported to log sinks.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Grpc => "grpc",
            Self::Jrpc => "jrpc",
            Self::Tcp => "tcp",
        }
    }

    /// Parses a sink name back into a request type.
    ///
    /// Unknown names fall back to [`RequestType::Grpc`].
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "rest" => Self::Rest,
            "jrpc" => Self::Jrpc,
            "tcp" => Self::Tcp,
            _ => Self::Grpc,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored in a [`RequestContext`].
#[derive(Clone)]
pub enum ContextValue {
    /// Plain text.
    Text(String),
    /// The request kind.
    RequestType(RequestType),
    /// Opaque payload; only ever rendered with `Debug`.
    Payload(Arc<dyn fmt::Debug + Send + Sync>),
}

impl ContextValue {
    /// Wraps an arbitrary payload.
    pub fn payload<T>(value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        Self::Payload(Arc::new(value))
    }

    /// Returns the text if this is a [`ContextValue::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Renders the value the way log sinks see it.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::RequestType(kind) => kind.as_str().to_string(),
            Self::Payload(payload) => format!("{payload:?}"),
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::RequestType(kind) => f.debug_tuple("RequestType").field(kind).finish(),
            Self::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::RequestType(a), Self::RequestType(b)) => a == b,
            (Self::Payload(a), Self::Payload(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<RequestType> for ContextValue {
    fn from(value: RequestType) -> Self {
        Self::RequestType(value)
    }
}

/// Immutable per-request metadata.
///
/// Cloning is cheap: snapshots share their entries through an [`Arc`].
///
/// # Example
///
/// ```
/// use nano_core::{keys, RequestContext, RequestType};
///
/// let base = RequestContext::base(RequestType::Rest);
/// let child = base.append([keys::REQUEST_FUNC, "GET /users"]).unwrap();
///
/// assert_eq!(child.function_name(), "GET /users");
/// assert_eq!(base.function_name(), "");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    entries: Arc<HashMap<String, ContextValue>>,
}

impl RequestContext {
    /// Creates an empty context tagged with a request kind.
    #[must_use]
    pub fn base(request_type: RequestType) -> Self {
        let mut entries = HashMap::with_capacity(8);
        entries.insert(
            keys::REQUEST_TYPE.to_string(),
            ContextValue::RequestType(request_type),
        );
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns a new context holding the parent's entries plus the given
    /// flat `key, value, key, value, ...` sequence. New entries win on key
    /// collision.
    ///
    /// Fails with [`CoreError::Configuration`] on an odd number of items or a
    /// key that is not text. The parent is never modified.
    pub fn append<I, V>(&self, kv: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<ContextValue>,
    {
        let items: Vec<ContextValue> = kv.into_iter().map(Into::into).collect();
        if items.len() % 2 == 1 {
            return Err(CoreError::configuration(format!(
                "append got an odd number of key/value items: {}",
                items.len()
            )));
        }

        let mut entries = HashMap::with_capacity(self.entries.len() + items.len() / 2);
        for (key, value) in self.entries.iter() {
            entries.insert(key.clone(), value.clone());
        }

        let mut items = items.into_iter();
        let mut pair = 0;
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let ContextValue::Text(key) = key else {
                return Err(CoreError::configuration(format!(
                    "append got a non-text key at pair #{pair}"
                )));
            };
            entries.insert(key, value);
            pair += 1;
        }

        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// Returns a new context with a single extra entry.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value.into());
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Builds the context for an inbound call.
    ///
    /// Resolves the request id (writing a generated one back into
    /// `metadata`), resolves the client address and copies the caller's
    /// identity out of the transport metadata.
    pub fn initialize(
        metadata: &mut Metadata,
        peer: Option<SocketAddr>,
        request_type: RequestType,
        function_name: impl Into<String>,
        payload: Option<ContextValue>,
    ) -> Self {
        let request_id = metadata::resolve_request_id(metadata);
        let client_ip = match metadata.get_first(keys::CONTEXT_IP) {
            Some(ip) if !ip.is_empty() => ip.to_string(),
            _ => {
                let ip = crate::client_ip::resolve(metadata, peer);
                metadata.set(keys::CONTEXT_IP, ip.clone());
                ip
            }
        };
        let inbound = |key: &str| metadata.get_first(key).unwrap_or_default().to_string();

        let mut entries = HashMap::with_capacity(8);
        entries.insert(
            keys::REQUEST_TYPE.to_string(),
            ContextValue::RequestType(request_type),
        );
        entries.insert(
            keys::REQUEST_FUNC.to_string(),
            ContextValue::Text(function_name.into()),
        );
        entries.insert(keys::REQUEST_ID.to_string(), ContextValue::Text(request_id));
        entries.insert(keys::CONTEXT_IP.to_string(), ContextValue::Text(client_ip));
        for key in [keys::SERVER_NAME, keys::SERVER_GROUP, keys::USER_AGENT] {
            entries.insert(key.to_string(), ContextValue::Text(inbound(key)));
        }
        if let Some(payload) = payload {
            entries.insert(keys::REQUEST_INFO.to_string(), payload);
        }

        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    /// Returns the value stored under `key`, or `default`.
    #[must_use]
    pub fn lookup_or(&self, key: &str, default: ContextValue) -> ContextValue {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    /// Returns the text stored under `key`, or `""`.
    #[must_use]
    pub fn text(&self, key: &str) -> &str {
        self.entries
            .get(key)
            .and_then(ContextValue::as_text)
            .unwrap_or_default()
    }

    /// Returns the request kind, defaulting to [`RequestType::Grpc`].
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        match self.entries.get(keys::REQUEST_TYPE) {
            Some(ContextValue::RequestType(kind)) => *kind,
            Some(ContextValue::Text(text)) => RequestType::parse_lossy(text),
            _ => RequestType::default(),
        }
    }

    /// Returns the name of the function being served.
    #[must_use]
    pub fn function_name(&self) -> &str {
        self.text(keys::REQUEST_FUNC)
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.text(keys::REQUEST_ID)
    }

    /// Returns the resolved client address.
    #[must_use]
    pub fn client_ip(&self) -> &str {
        self.text(keys::CONTEXT_IP)
    }

    /// Returns the client user agent.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.text(keys::USER_AGENT)
    }

    /// Returns the calling service's name.
    #[must_use]
    pub fn caller_name(&self) -> &str {
        self.text(keys::SERVER_NAME)
    }

    /// Returns the calling service's group.
    #[must_use]
    pub fn caller_group(&self) -> &str {
        self.text(keys::SERVER_GROUP)
    }

    /// Returns the stringified request payload, or `""` when absent.
    #[must_use]
    pub fn payload(&self) -> String {
        self.entries
            .get(keys::REQUEST_INFO)
            .map(ContextValue::render)
            .unwrap_or_default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
