//! # Nano Middleware
//!
//! Recovery boundaries for nano services.
//!
//! A request enters through one of two boundaries:
//!
//! ```text
//! REST: Request → RecoveryMiddleware → [stages…] → Router → handler
//!                        ↓
//!        Response ← envelope / Nano-Request-ID
//!
//! RPC:  call → UnaryRecovery → handler → Result<Resp, ErrorResponse>
//! ```
//!
//! Both share a [`Recoverer`], which classifies what the handler produced
//! and writes one record to the log pipeline:
//!
//! | Outcome | Stream | Caller sees |
//! |---------|--------|-------------|
//! | success | access (sampled) | handler response |
//! | declared [`ServerError`](nano_core::ServerError) | warning | its envelope |
//! | error message matching a registered error | warning | that error |
//! | any other error | error | `unknow_error` (or code `10001` in debug) |
//! | text panic | error | `unknow_error` with the text as detail |
//!
//! Handlers and stages return [`HandlerResult`]; errors are propagated as
//! values up to the recovery stage.

#![doc(html_root_url = "https://docs.rs/nano-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod recover;
pub mod router;
pub mod rpc;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use recover::{AccessLog, Recoverer};
pub use router::{Handler, Router};
pub use rpc::{ErrorResponse, UnaryRecovery};
pub use stages::recovery::{RecoveryMiddleware, REQUEST_ID_HEADER};
pub use types::{HandlerResult, Request, Response, ResponseExt};
