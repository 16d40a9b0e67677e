//! Application context.
//!
//! [`App`] owns everything a service shares across requests: the
//! configuration, the error registry, the log pipeline, the middleware
//! pipeline and the router. Nothing is process-global; two apps in one
//! process are fully independent.

use crate::error::NanoResult;
use nano_config::NanoConfig;
use nano_core::{ErrorRegistry, HandlerError, Metadata, RequestContext, ServerError};
use nano_middleware::pipeline::BoxedMiddleware;
use nano_middleware::{
    Middleware, MiddlewareContext, Pipeline, Recoverer, RecoveryMiddleware, Request, Response,
    ResponseExt, Router, UnaryRecovery,
};
use nano_telemetry::{
    init_logging, init_metrics, LogPipeline, MetricsRegistry, Sink, TracingSink,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};

/// A running service.
///
/// # Example
///
/// ```no_run
/// use nano::App;
/// use nano_config::NanoConfig;
///
/// # fn main() -> nano::NanoResult<()> {
/// let app = App::initialize(NanoConfig::production())?;
/// // serve requests with app.handle(..) / app.unary(..)
/// app.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct App {
    config: RwLock<NanoConfig>,
    registry: Arc<ErrorRegistry>,
    logs: Arc<LogPipeline>,
    recoverer: Recoverer,
    pipeline: Pipeline,
    router: Arc<Router>,
    unary: UnaryRecovery,
    metrics: Option<MetricsRegistry>,
}

impl App {
    /// Starts an app with the given configuration, an empty router and
    /// records forwarded to `tracing`.
    pub fn initialize(config: NanoConfig) -> NanoResult<Self> {
        Self::builder().config(config).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Serves a REST request.
    ///
    /// Never fails: errors and panics are converted into error envelopes by
    /// the recovery stage.
    pub async fn handle(&self, request: Request) -> Response {
        let router = Arc::clone(&self.router);
        self.pipeline
            .process(MiddlewareContext::new(), request, move |ctx, req| {
                let request_ctx = ctx.request_context().clone();
                Box::pin(async move { router.call(request_ctx, req).await })
            })
            .await
            .unwrap_or_else(|err| Response::from_handler_error(&err))
    }

    /// Serves a unary RPC call. See [`UnaryRecovery::call`].
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        func_name: &str,
        metadata: &mut Metadata,
        peer: Option<SocketAddr>,
        request: Req,
        handler: F,
    ) -> Result<Resp, nano_middleware::ErrorResponse>
    where
        Req: Clone + Debug + Send + Sync + 'static,
        F: FnOnce(RequestContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp, HandlerError>>,
    {
        self.unary
            .call(func_name, metadata, peer, request, handler)
            .await
    }

    /// Registers a domain error.
    pub fn register_error(&self, error: ServerError) -> NanoResult<ServerError> {
        Ok(self.registry.register(error)?)
    }

    /// Writes a project record. See [`LogPipeline::project`].
    pub fn project(
        &self,
        level: Level,
        message: &str,
        action: &str,
        ctx: Option<&RequestContext>,
        fields: &[(&str, Value)],
    ) -> NanoResult<()> {
        Ok(self.logs.project(level, message, action, ctx, fields)?)
    }

    /// Applies a new configuration.
    ///
    /// The log pipeline is resized and renamed without losing buffered
    /// records, and debug mode takes effect for the next request.
    pub fn reconfigure(&self, config: NanoConfig) -> NanoResult<()> {
        config.validate()?;
        self.logs.reconfigure(&config.logging, config.identity())?;
        self.recoverer.set_debug(config.server.debug);
        info!(
            server = %config.server.name,
            group = %config.server.group,
            debug = config.server.debug,
            writers = config.logging.writer_count(),
            "Configuration applied"
        );
        *self.config.write() = config;
        Ok(())
    }

    /// Drains buffered records and stops the log writers.
    pub fn shutdown(&self) {
        self.logs.shutdown();
        info!("Log pipeline stopped");
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> NanoConfig {
        self.config.read().clone()
    }

    /// Returns the error registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.registry
    }

    /// Returns the log pipeline.
    #[must_use]
    pub fn logs(&self) -> &Arc<LogPipeline> {
        &self.logs
    }

    /// Returns the recovery boundary.
    #[must_use]
    pub fn recoverer(&self) -> &Recoverer {
        &self.recoverer
    }

    /// Returns the middleware pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Renders the Prometheus exposition, if a metrics registry is attached.
    #[must_use]
    pub fn metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(MetricsRegistry::render)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("server", &self.config.read().server.name)
            .field("pipeline", &self.pipeline)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Builder for [`App`].
pub struct AppBuilder {
    config: NanoConfig,
    sink: Option<Arc<dyn Sink>>,
    router: Router,
    stages: Vec<BoxedMiddleware>,
    skip_paths: Option<Vec<String>>,
    errors: Vec<ServerError>,
    install_logging: bool,
    install_metrics: bool,
    metrics: Option<MetricsRegistry>,
}

impl AppBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: NanoConfig::default(),
            sink: None,
            router: Router::new(),
            stages: Vec::new(),
            skip_paths: None,
            errors: Vec::new(),
            install_logging: false,
            install_metrics: false,
            metrics: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: NanoConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where request records are written. Defaults to [`TracingSink`].
    #[must_use]
    pub fn sink(mut self, sink: impl Sink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Sets the router.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Adds a stage after the recovery stage. Stages run in the order
    /// they are added.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Sets the paths whose successful requests are not access-logged.
    #[must_use]
    pub fn skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Registers a domain error at startup.
    #[must_use]
    pub fn error(mut self, error: ServerError) -> Self {
        self.errors.push(error);
        self
    }

    /// Installs the global `tracing` subscriber from the telemetry section.
    #[must_use]
    pub fn install_logging(mut self, install: bool) -> Self {
        self.install_logging = install;
        self
    }

    /// Installs the Prometheus metrics recorder.
    #[must_use]
    pub fn install_metrics(mut self, install: bool) -> Self {
        self.install_metrics = install;
        self
    }

    /// Attaches an already installed metrics registry.
    #[must_use]
    pub fn metrics(mut self, registry: MetricsRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Validates the configuration and starts the app.
    pub fn build(self) -> NanoResult<App> {
        self.config.validate()?;
        if self.install_logging {
            init_logging(&self.config.telemetry)?;
        }
        let metrics = match self.metrics {
            Some(registry) => Some(registry),
            None if self.install_metrics => Some(init_metrics()?),
            None => None,
        };

        let registry = Arc::new(ErrorRegistry::new());
        for error in self.errors {
            registry.register(error)?;
        }

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink::new()) as Arc<dyn Sink>);
        let logs = Arc::new(LogPipeline::start(
            &self.config.logging,
            self.config.identity(),
            sink,
        )?);
        let recoverer = Recoverer::new(
            Arc::clone(&registry),
            Arc::clone(&logs),
            self.config.server.debug,
        );

        let mut recovery = RecoveryMiddleware::new(recoverer.clone());
        if let Some(paths) = self.skip_paths {
            recovery = recovery.with_skip_paths(paths);
        }
        let mut pipeline = Pipeline::builder().add_stage(recovery);
        for stage in self.stages {
            pipeline = pipeline.add_shared_stage(stage);
        }

        info!(
            server = %self.config.server.name,
            group = %self.config.server.group,
            routes = self.router.len(),
            "Application initialized"
        );

        Ok(App {
            config: RwLock::new(self.config),
            registry,
            logs,
            unary: UnaryRecovery::new(recoverer.clone()),
            recoverer,
            pipeline: pipeline.build(),
            router: Arc::new(self.router),
            metrics,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
