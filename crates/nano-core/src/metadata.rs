//! Transport metadata.
//!
//! [`Metadata`] mirrors RPC metadata: a multimap with case-insensitive keys.
//! REST requests are mapped onto it from their header map so both surfaces
//! go through the same context initialization.

use crate::context::{keys, RequestId};
use http::HeaderMap;
use std::collections::HashMap;

/// Case-insensitive multimap of inbound transport metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds metadata from an HTTP header map.
    ///
    /// Values that are not valid visible ASCII are skipped.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Self::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                metadata.append(name.as_str(), value);
            }
        }
        metadata
    }

    /// Returns every value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).first().map(String::as_str)
    }

    /// Replaces all values under `key`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Adds a value under `key`.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Returns `true` if no keys are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns the request id carried by `metadata`, minting one if needed.
///
/// A non-empty inbound id is reused. Otherwise a new UUID v7 is generated
/// and written back so the rest of the call observes the same value.
pub fn resolve_request_id(metadata: &mut Metadata) -> String {
    if let Some(id) = metadata.get_first(keys::REQUEST_ID) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    let id = RequestId::new().to_string();
    metadata.set(keys::REQUEST_ID, id.clone());
    tracing::trace!(request_id = %id, "generated request id");
    id
}
