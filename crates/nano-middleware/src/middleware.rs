//! Core middleware trait and types.
//!
//! Every stage returns a [`HandlerResult`]: errors travel back up the chain
//! as values until the recovery stage turns them into a response. Stages
//! that cannot handle an error must pass it on unchanged.
//!
//! # Example
//!
//! ```
//! use nano_middleware::{BoxFuture, HandlerResult, Middleware, MiddlewareContext, Next, Request};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, HandlerResult> {
//!         Box::pin(async move {
//!             let result = next.run(ctx, request).await;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "stage finished");
//!             result
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::types::{HandlerResult, Request};
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal handler of a chain.
pub type TerminalHandler<'a> =
    Box<dyn FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a>;

/// A middleware stage.
///
/// A stage receives the mutable context, the request and a [`Next`] to
/// continue the chain. Not calling `next` short-circuits the chain.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used in logs.
    fn name(&self) -> &'static str;

    /// Processes the request.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// The rest of the chain.
///
/// Consumed by [`Next::run`], so it can be invoked at most once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(TerminalHandler<'a>),
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage, or the handler at the end of the chain.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> HandlerResult {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use nano_core::ServerError;

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn name(&self) -> &'static str {
            "short-circuit"
        }

        fn process<'a>(
            &'a self,
            _ctx: &'a mut MiddlewareContext,
            _request: Request,
            _next: Next<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async { Err(ServerError::project_match().into()) })
        }
    }

    fn request() -> Request {
        http::Request::new(Full::new(Bytes::new()))
    }

    fn ok_handler(_: &mut MiddlewareContext, _: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async { Ok(Response::json(StatusCode::OK, &serde_json::json!({}))) })
    }

    #[tokio::test]
    async fn test_terminal_handler_runs() {
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(ok_handler);
        let response = next.run(&mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_circuit_propagates_error() {
        let stage = ShortCircuit;
        let mut ctx = MiddlewareContext::new();
        let next = Next::new(&stage, Next::handler(ok_handler));
        let err = next.run(&mut ctx, request()).await.unwrap_err();
        assert!(matches!(
            err,
            nano_core::HandlerError::Domain(ref e) if e.code == "10003"
        ));
    }
}
