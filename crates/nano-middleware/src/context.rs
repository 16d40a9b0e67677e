//! Middleware context.
//!
//! [`MiddlewareContext`] carries per-request state through the pipeline. The
//! recovery stage fills in the [`RequestContext`]; later stages and the
//! handler read it from here.

use nano_core::{RequestContext, RequestType};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use nano_middleware::MiddlewareContext;
///
/// #[derive(Clone)]
/// struct Tenant(&'static str);
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_extension(Tenant("eu"));
/// assert_eq!(ctx.get_extension::<Tenant>().unwrap().0, "eu");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request: RequestContext,
    started_at: Instant,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a context holding an empty REST request context.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_context(RequestContext::base(RequestType::Rest))
    }

    /// Creates a context around an existing request context.
    #[must_use]
    pub fn with_request_context(request: RequestContext) -> Self {
        Self {
            request,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Returns the request context.
    #[must_use]
    pub fn request_context(&self) -> &RequestContext {
        &self.request
    }

    /// Replaces the request context.
    ///
    /// Contexts are immutable; stages derive a new one with
    /// [`RequestContext::append`] and store it here.
    pub fn set_request_context(&mut self, request: RequestContext) {
        self.request = request;
    }

    /// Returns when the request entered the pipeline.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time since the request entered the pipeline.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
