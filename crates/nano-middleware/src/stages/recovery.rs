//! REST recovery stage.
//!
//! Builds the request context from the inbound headers, runs the rest of
//! the chain inside the recovery boundary and converts any error or panic
//! into the JSON error envelope. Every response carries the resolved
//! `Nano-Request-ID` header.
//!
//! The peer address is read from the request extensions, where the
//! transport is expected to store it as a [`SocketAddr`].

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::recover::{AccessLog, Recoverer};
use crate::types::{HandlerResult, Request, Response, ResponseExt};
use futures_util::FutureExt;
use http::header::HeaderValue;
use nano_core::{ContextValue, Metadata, RequestContext, RequestType};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

/// Header carrying the request id, in both directions.
pub const REQUEST_ID_HEADER: &str = "nano-request-id";

/// Paths that never write access records by default.
pub const DEFAULT_SKIP_PATHS: &[&str] = &["/metric"];

/// The outermost REST stage.
#[derive(Debug, Clone)]
pub struct RecoveryMiddleware {
    recoverer: Recoverer,
    skip_paths: HashSet<String>,
}

impl RecoveryMiddleware {
    /// Creates the stage with the default skip paths.
    #[must_use]
    pub fn new(recoverer: Recoverer) -> Self {
        Self {
            recoverer,
            skip_paths: DEFAULT_SKIP_PATHS.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Replaces the paths whose successful requests are not access-logged.
    /// Failures on these paths are still logged.
    #[must_use]
    pub fn with_skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the shared recovery boundary.
    #[must_use]
    pub fn recoverer(&self) -> &Recoverer {
        &self.recoverer
    }

    fn init_context(request: &mut Request) -> RequestContext {
        let mut metadata = Metadata::from_headers(request.headers());
        let peer = request.extensions().get::<SocketAddr>().copied();
        let func = format!("{} {}", request.method(), request.uri().path());
        let payload = request.uri().query().map(ContextValue::from);

        let ctx =
            RequestContext::initialize(&mut metadata, peer, RequestType::Rest, func, payload);
        if let Ok(value) = HeaderValue::from_str(ctx.request_id()) {
            request.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        ctx
    }

    fn access_log(&self, path: &str) -> AccessLog {
        if self.skip_paths.contains(path) {
            AccessLog::Skip
        } else {
            AccessLog::Sampled
        }
    }
}

impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let request_ctx = Self::init_context(&mut request);
            let request_id = request_ctx.request_id().to_string();
            let access = self.access_log(request.uri().path());
            let span = self.recoverer.span(&request_ctx);
            ctx.set_request_context(request_ctx);

            let outcome = AssertUnwindSafe(next.run(ctx, request))
                .catch_unwind()
                .instrument(span)
                .await;
            let elapsed = ctx.elapsed();
            let settled = self
                .recoverer
                .settle(ctx.request_context(), elapsed, access, outcome);

            let mut response = match settled {
                Ok(response) => response,
                Err(err) => Response::envelope(&err),
            };
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}
