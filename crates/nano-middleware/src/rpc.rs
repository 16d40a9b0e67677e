//! Recovery for unary RPC handlers.
//!
//! [`UnaryRecovery`] decorates a unary handler the way the REST stage
//! decorates the middleware chain: it builds the request context from the
//! call metadata, runs the handler inside the recovery boundary and turns
//! every failure into an [`ErrorResponse`].

use crate::recover::{AccessLog, Recoverer};
use nano_core::{ContextValue, ErrorEnvelope, HandlerError, Metadata, RequestContext, RequestType};
use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;

/// The error returned to RPC callers.
pub type ErrorResponse = ErrorEnvelope;

/// Recovery boundary for unary RPC calls.
///
/// # Example
///
/// ```no_run
/// use nano_core::{HandlerError, Metadata};
/// use nano_middleware::UnaryRecovery;
///
/// # async fn serve(recovery: UnaryRecovery) {
/// let mut metadata = Metadata::new();
/// let reply = recovery
///     .call("/orders.Orders/Get", &mut metadata, None, 42_u64, |ctx, id| async move {
///         Ok::<_, HandlerError>(format!("order {id} for {}", ctx.request_id()))
///     })
///     .await;
/// # let _ = reply;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct UnaryRecovery {
    recoverer: Recoverer,
}

impl UnaryRecovery {
    /// Creates the decorator.
    #[must_use]
    pub fn new(recoverer: Recoverer) -> Self {
        Self { recoverer }
    }

    /// Returns the shared recovery boundary.
    #[must_use]
    pub fn recoverer(&self) -> &Recoverer {
        &self.recoverer
    }

    /// Serves one unary call.
    ///
    /// A missing request id is generated and written back into `metadata`,
    /// so the transport can return it to the caller. The request itself is
    /// kept in the context as the payload reported on failure records.
    pub async fn call<Req, Resp, F, Fut>(
        &self,
        func_name: &str,
        metadata: &mut Metadata,
        peer: Option<SocketAddr>,
        request: Req,
        handler: F,
    ) -> Result<Resp, ErrorResponse>
    where
        Req: Clone + Debug + Send + Sync + 'static,
        F: FnOnce(RequestContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp, HandlerError>>,
    {
        let ctx = RequestContext::initialize(
            metadata,
            peer,
            RequestType::Grpc,
            func_name,
            Some(ContextValue::payload(request.clone())),
        );

        let handler_ctx = ctx.clone();
        self.recoverer
            .run(&ctx, AccessLog::Sampled, async move {
                handler(handler_ctx, request).await
            })
            .await
            .map_err(|err| err.to_envelope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use nano_core::{keys, ErrorRegistry, ServerError};
    use nano_telemetry::{LogPipeline, MemorySink, PipelineConfig, ServerIdentity};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct GetOrder {
        id: u64,
    }

    fn recovery(sink: &MemorySink) -> UnaryRecovery {
        let logs = LogPipeline::start(
            &PipelineConfig::default().with_writers(1),
            ServerIdentity::new("orders", "shop"),
            Arc::new(sink.clone()),
        )
        .unwrap();
        UnaryRecovery::new(Recoverer::new(
            Arc::new(ErrorRegistry::new()),
            Arc::new(logs),
            false,
        ))
    }

    #[tokio::test]
    async fn test_successful_call() {
        let sink = MemorySink::new();
        let recovery = recovery(&sink);
        let mut metadata = Metadata::new();
        metadata.set(keys::SERVER_GROUP, "shop");
        let peer: SocketAddr = "10.0.0.7:5000".parse().unwrap();

        let reply = recovery
            .call(
                "/orders.Orders/Get",
                &mut metadata,
                Some(peer),
                GetOrder { id: 9 },
                |ctx, req| async move {
                    assert_eq!(ctx.request_type(), RequestType::Grpc);
                    assert_eq!(ctx.client_ip(), "10.0.0.7");
                    assert_eq!(ctx.caller_group(), "shop");
                    Ok(req.id * 2)
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, 18);

        let request_id = metadata.get_first(keys::REQUEST_ID).unwrap().to_string();
        assert!(!request_id.is_empty());

        recovery.recoverer().logs().shutdown();
        let access = sink.records_for("access");
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].record.request_id, request_id);
        assert_eq!(access[0].record.request_type, "grpc");
        assert_eq!(access[0].record.request_func, "/orders.Orders/Get");
    }

    #[tokio::test]
    async fn test_declared_error_with_payload() {
        let sink = MemorySink::new();
        let recovery = recovery(&sink);
        let mut metadata = Metadata::new();

        let err = recovery
            .call(
                "/orders.Orders/Get",
                &mut metadata,
                None,
                GetOrder { id: 9 },
                |_, _| async {
                    Err::<u64, _>(ServerError::project_match().with_details(vec!["id".into()]).into())
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "10003");
        assert_eq!(err.details, vec!["id".to_string()]);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        recovery.recoverer().logs().shutdown();
        let warns = sink.records_for("warning");
        assert_eq!(warns.len(), 1);
        assert_eq!(warns[0].record.query.as_deref(), Some("GetOrder { id: 9 }"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recovered() {
        let sink = MemorySink::new();
        let recovery = recovery(&sink);
        let mut metadata = Metadata::new();
        metadata.set(keys::REQUEST_ID, "rpc-1");

        let err = recovery
            .call("/orders.Orders/Get", &mut metadata, None, 1_u8, |_, id| async move {
                if id == 1 {
                    panic!("boom");
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, "10000");
        assert_eq!(err.details, vec!["boom".to_string()]);

        recovery.recoverer().logs().shutdown();
        let errors = sink.records_for("error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record.request_id, "rpc-1");
    }
}
