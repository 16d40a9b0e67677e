//! Exact-path routing with the `not_found` / `no_method` fallbacks.

use crate::middleware::BoxFuture;
use crate::types::{HandlerResult, Request};
use http::Method;
use nano_core::{RequestContext, ServerError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A routed request handler.
pub type Handler =
    Arc<dyn Fn(RequestContext, Request) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Maps `(method, path)` to handlers.
///
/// An unknown path resolves to the `not_found` error (404), a known path
/// with an unregistered method to `no_method` (405).
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, HashMap<Method, Handler>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same route.
    #[must_use]
    pub fn route<F, Fut>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |ctx: RequestContext, request: Request| -> BoxFuture<'static, HandlerResult> {
                Box::pin(handler(ctx, request))
            },
        );
        self.routes
            .entry(path.into())
            .or_default()
            .insert(method, handler);
        self
    }

    /// Finds the handler for a route.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<Handler, ServerError> {
        let methods = self.routes.get(path).ok_or_else(ServerError::not_found)?;
        methods
            .get(method)
            .cloned()
            .ok_or_else(ServerError::no_method)
    }

    /// Resolves and calls the handler for `request`.
    ///
    /// The handler is invoked inside the returned future, so a panic in it
    /// surfaces where the future is polled.
    pub async fn call(&self, ctx: RequestContext, request: Request) -> HandlerResult {
        let handler = self.resolve(request.method(), request.uri().path())?;
        handler(ctx, request).await
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// Returns `true` if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<_> = self.routes.keys().collect();
        paths.sort();
        f.debug_struct("Router").field("paths", &paths).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use nano_core::{HandlerError, RequestType};

    fn router() -> Router {
        Router::new().route(Method::GET, "/users", |_, _| async {
            Ok(Response::json(StatusCode::OK, &serde_json::json!([])))
        })
    }

    fn request(method: Method, path: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_registered_route() {
        let response = router()
            .call(
                RequestContext::base(RequestType::Rest),
                request(Method::GET, "/users"),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let err = router()
            .call(
                RequestContext::base(RequestType::Rest),
                request(Method::GET, "/orders"),
            )
            .await
            .unwrap_err();
        let HandlerError::Domain(err) = err else {
            panic!("expected a domain error");
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.msg, "not_found");
    }

    #[test]
    fn test_wrong_method_is_no_method() {
        let err = router().resolve(&Method::POST, "/users").err().unwrap();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(err.code, "10005");
    }

    #[test]
    fn test_len() {
        let router = router().route(Method::POST, "/users", |_, _| async {
            Ok(Response::json(StatusCode::CREATED, &serde_json::json!({})))
        });
        assert_eq!(router.len(), 2);
        assert!(!router.is_empty());
    }
}
