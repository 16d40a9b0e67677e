//! The recovery boundary shared by the REST stage and the RPC decorator.
//!
//! [`Recoverer::settle`] turns the outcome of a handler (a value, a returned
//! error or a caught panic) into exactly one caller-facing result and at
//! most one log record.

use futures_util::FutureExt;
use nano_core::{ErrorRegistry, Failure, HandlerError, RequestContext, ServerError, Severity};
use nano_telemetry::{request_span, LogPipeline};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn, Instrument, Span};

/// What a handler produced: its own result, or the payload of a panic.
pub type Outcome<T> = Result<Result<T, HandlerError>, Box<dyn Any + Send>>;

/// Whether a successful request writes an access record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLog {
    /// Subject to the pipeline's sampling rate.
    Sampled,
    /// Never written.
    Skip,
}

/// Classifies failures, writes request records and builds error responses.
///
/// Cheap to clone; clones share the registry, the log pipeline and the
/// debug switch.
#[derive(Clone)]
pub struct Recoverer {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ErrorRegistry>,
    logs: Arc<LogPipeline>,
    debug: AtomicBool,
}

impl Recoverer {
    /// Creates a recovery boundary.
    #[must_use]
    pub fn new(registry: Arc<ErrorRegistry>, logs: Arc<LogPipeline>, debug: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                logs,
                debug: AtomicBool::new(debug),
            }),
        }
    }

    /// Switches debug mode. In debug mode unclassified failures are
    /// reported to the caller with their message and stack.
    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.store(debug, Ordering::Relaxed);
    }

    /// Returns `true` in debug mode.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    /// Returns the error registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.inner.registry
    }

    /// Returns the log pipeline.
    #[must_use]
    pub fn logs(&self) -> &Arc<LogPipeline> {
        &self.inner.logs
    }

    /// Opens the tracing span for a request.
    #[must_use]
    pub fn span(&self, ctx: &RequestContext) -> Span {
        request_span(&self.inner.logs.identity(), ctx)
    }

    /// Runs `fut` inside the boundary and settles its outcome.
    ///
    /// Panics raised while polling `fut` are caught here.
    pub async fn run<T, Fut>(
        &self,
        ctx: &RequestContext,
        access: AccessLog,
        fut: Fut,
    ) -> Result<T, ServerError>
    where
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(fut)
            .catch_unwind()
            .instrument(self.span(ctx))
            .await;
        self.settle(ctx, started.elapsed(), access, outcome)
    }

    /// Settles a handler outcome.
    ///
    /// Success writes an access record unless `access` is
    /// [`AccessLog::Skip`]. A failure is classified once, written to the
    /// warn or error stream and converted into the caller-facing error.
    pub fn settle<T>(
        &self,
        ctx: &RequestContext,
        elapsed: Duration,
        access: AccessLog,
        outcome: Outcome<T>,
    ) -> Result<T, ServerError> {
        let registry = &self.inner.registry;
        let failure = match outcome {
            Ok(Ok(value)) => {
                if access == AccessLog::Sampled {
                    self.inner.logs.access(ctx, elapsed);
                }
                return Ok(value);
            }
            Ok(Err(err)) => Failure::from_error(err, registry),
            Err(payload) => Failure::from_panic(payload, registry),
        };
        Err(self.recover(ctx, elapsed, &failure))
    }

    fn recover(&self, ctx: &RequestContext, elapsed: Duration, failure: &Failure) -> ServerError {
        let response = failure.to_response(&self.inner.registry, self.is_debug());
        match failure.severity() {
            Severity::Warn => debug!(
                request_id = %ctx.request_id(),
                code = %response.code,
                "Request failed with a declared error"
            ),
            Severity::Error => warn!(
                request_id = %ctx.request_id(),
                func = %ctx.function_name(),
                code = %failure.error_code(),
                "Recovered from an unclassified failure"
            ),
        }
        self.inner.logs.failure(ctx, failure, elapsed);
        response
    }
}

impl std::fmt::Debug for Recoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recoverer")
            .field("debug", &self.is_debug())
            .field("registered_errors", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
