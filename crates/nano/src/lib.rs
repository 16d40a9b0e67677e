//! # Nano
//!
//! Request infrastructure for REST and RPC services: one recovery
//! boundary per request, structured request records written through a
//! pooled, backpressure-aware pipeline, and request-scoped metadata that
//! follows a call across services.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nano::prelude::*;
//! use http::{Method, StatusCode};
//!
//! # async fn run() -> nano::NanoResult<()> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("nano.toml")?
//!     .with_deployment_env()
//!     .load()?;
//!
//! let router = Router::new().route(Method::GET, "/ping", |ctx: RequestContext, _| async move {
//!     tracing::info!(request_id = %ctx.request_id(), "ping");
//!     Ok(Response::json(StatusCode::OK, &serde_json::json!({ "pong": true })))
//! });
//!
//! let app = App::builder()
//!     .config(config)
//!     .router(router)
//!     .install_logging(true)
//!     .build()?;
//! # let request: Request = unimplemented!();
//! let response = app.handle(request).await;
//! # let _ = response;
//! app.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`core`] | request context, metadata, domain errors, failure classification |
//! | [`telemetry`] | log pipeline, sinks, `tracing` setup, metrics |
//! | [`config`] | layered configuration |
//! | [`middleware`] | recovery stage, RPC decorator, pipeline, router |

#![doc(html_root_url = "https://docs.rs/nano/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod error;

pub use app::{App, AppBuilder};
pub use error::{NanoError, NanoResult};

pub use nano_config as config;
pub use nano_core as core;
pub use nano_middleware as middleware;
pub use nano_telemetry as telemetry;

/// Common imports.
pub mod prelude {
    pub use crate::{App, AppBuilder, NanoError, NanoResult};
    pub use nano_config::{ConfigLoader, NanoConfig};
    pub use nano_core::{
        keys, ContextValue, ErrorRegistry, HandlerError, Metadata, RequestContext, RequestType,
        ServerError,
    };
    pub use nano_middleware::{
        BoxFuture, HandlerResult, Middleware, MiddlewareContext, Next, Request, Response,
        ResponseExt, Router,
    };
    pub use nano_telemetry::{DirectorySink, MemorySink, MetricsRegistry, Sink, TracingSink};
}
