//! # Nano Core
//!
//! Core types shared by every nano service surface.
//!
//! - [`RequestContext`] - Immutable, append-only per-request metadata
//! - [`Metadata`] - Case-insensitive transport metadata (headers / RPC metadata)
//! - [`ServerError`] and [`ErrorRegistry`] - Declared domain errors
//! - [`Failure`] - Classification of anything that escapes a handler

#![doc(html_root_url = "https://docs.rs/nano-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classify;
pub mod client_ip;
mod context;
mod error;
pub mod metadata;

pub use classify::{Failure, HandlerError, Severity};
pub use context::{keys, ContextValue, RequestContext, RequestId, RequestType};
pub use error::{
    messages, CoreError, CoreResult, ErrorEnvelope, ErrorRegistry, ServerError, UNCLASSIFIED_CODE,
};
pub use metadata::Metadata;
