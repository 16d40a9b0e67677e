//! Request log pipeline.
//!
//! [`LogPipeline`] is what recovery boundaries talk to: it samples access
//! records, fills pooled records from the request context and hands them
//! to the [`Dispatcher`]. Failures inside the pipeline never reach the
//! request path.

use crate::config::{PipelineConfig, ServerIdentity, StreamNames};
use crate::dispatch::{DispatchSettings, DispatchStatsSnapshot, Dispatcher, RecordWriter};
use crate::error::TelemetryError;
use crate::metrics as names;
use crate::pool::{PoolStatsSnapshot, RecordPool, DEFAULT_MAX_IDLE};
use crate::record::{LogKind, SinkRecord};
use crate::sink::Sink;
use crate::TelemetryResult;
use metrics::counter;
use nano_core::{Failure, RequestContext, Severity};
use parking_lot::RwLock;
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};

/// `log_type` of project records.
pub const PROJECT_LOG_TYPE: &str = "project";

/// Decides which successful requests produce an access record.
#[derive(Debug)]
pub struct Sampler {
    percent: AtomicU8,
}

impl Sampler {
    /// Creates a sampler emitting `percent`% of records (clamped to 100).
    #[must_use]
    pub fn new(percent: u8) -> Self {
        Self {
            percent: AtomicU8::new(percent.min(100)),
        }
    }

    /// Returns the configured percentage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Changes the percentage.
    pub fn set_percent(&self, percent: u8) {
        self.percent.store(percent.min(100), Ordering::Relaxed);
    }

    /// Draws from the thread-local generator.
    #[must_use]
    pub fn should_emit(&self) -> bool {
        self.should_emit_with(&mut rand::thread_rng())
    }

    /// Draws uniformly from `0..100` and emits iff the draw is below the
    /// percentage.
    pub fn should_emit_with<R: Rng>(&self, rng: &mut R) -> bool {
        match self.percent() {
            0 => false,
            p if p >= 100 => true,
            p => rng.gen_range(0..100u8) < p,
        }
    }
}

/// Pooled, sampled, asynchronous request logging.
pub struct LogPipeline {
    pool: Arc<RecordPool>,
    dispatcher: Dispatcher,
    sampler: Sampler,
    routing: RwLock<Routing>,
}

/// Stream names and the writer of the running generation, swapped together.
struct Routing {
    streams: StreamNames,
    writer: Arc<RecordWriter>,
}

impl LogPipeline {
    /// Starts the pipeline.
    pub fn start(
        config: &PipelineConfig,
        identity: ServerIdentity,
        sink: Arc<dyn Sink>,
    ) -> TelemetryResult<Self> {
        names::describe_pipeline_metrics();
        let writer = Arc::new(RecordWriter::new(sink, identity));
        let dispatcher =
            Dispatcher::start(Arc::clone(&writer), DispatchSettings::from_config(config))?;
        Ok(Self {
            pool: RecordPool::new(DEFAULT_MAX_IDLE),
            dispatcher,
            sampler: Sampler::new(config.access_percent()),
            routing: RwLock::new(Routing {
                streams: config.streams.clone(),
                writer,
            }),
        })
    }

    /// Records a completed request, subject to sampling.
    ///
    /// Returns `true` if a record was enqueued.
    pub fn access(&self, ctx: &RequestContext, duration: Duration) -> bool {
        if !self.sampler.should_emit() {
            counter!(names::RECORDS_SAMPLED_OUT).increment(1);
            return false;
        }
        self.submit(LogKind::Access, ctx, duration, "", "")
    }

    /// Records a declared failure.
    pub fn warn(&self, ctx: &RequestContext, code: &str, reason: &str, duration: Duration) -> bool {
        self.submit(LogKind::Warn, ctx, duration, code, reason)
    }

    /// Records an unclassified failure.
    pub fn error(
        &self,
        ctx: &RequestContext,
        code: &str,
        reason: &str,
        duration: Duration,
    ) -> bool {
        self.submit(LogKind::Error, ctx, duration, code, reason)
    }

    /// Records a classified failure on the stream its severity selects.
    pub fn failure(&self, ctx: &RequestContext, failure: &Failure, duration: Duration) -> bool {
        let code = failure.error_code();
        let reason = failure.reason();
        match failure.severity() {
            Severity::Warn => self.warn(ctx, &code, &reason, duration),
            Severity::Error => self.error(ctx, &code, &reason, duration),
        }
    }

    fn submit(
        &self,
        kind: LogKind,
        ctx: &RequestContext,
        duration: Duration,
        code: &str,
        reason: &str,
    ) -> bool {
        // Held through the send so the stream name matches the generation.
        let routing = self.routing.read();
        let mut record = self.pool.acquire(kind);
        record.stream.push_str(routing.streams.for_kind(kind));
        record.context = Some(ctx.clone());
        record.duration = duration;
        record.error_code.push_str(code);
        record.reason.push_str(reason);

        match self.dispatcher.dispatch(record) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, kind = kind.log_type(), "Log record not dispatched");
                false
            }
        }
    }

    /// Writes a free-form project record synchronously.
    ///
    /// `action` names the record: it must start with an ASCII letter and
    /// contain only letters, digits, `-` and `_`. The record goes to the
    /// stream `<group>_<name>_<action>`, and each field key is prefixed with
    /// `<action>_`.
    pub fn project(
        &self,
        level: Level,
        message: &str,
        action: &str,
        ctx: Option<&RequestContext>,
        fields: &[(&str, Value)],
    ) -> TelemetryResult<()> {
        if !is_valid_action(action) {
            return Err(TelemetryError::InvalidConfig(format!(
                "log action '{action}' must start with a letter and contain only [a-zA-Z0-9_-]"
            )));
        }

        let writer = Arc::clone(&self.routing.read().writer);
        let identity = writer.identity();
        let event = identity.event(action);
        let empty = RequestContext::default();
        let ctx = ctx.unwrap_or(&empty);

        let mut properties = serde_json::Map::with_capacity(fields.len() + 1);
        for (key, value) in fields {
            properties.insert(format!("{action}_{key}"), value.clone());
        }
        properties.insert("log_act".to_string(), Value::String(action.to_string()));

        let mut record = SinkRecord::for_context(PROJECT_LOG_TYPE, event.clone(), identity, ctx);
        record.properties = properties;
        writer.sink().resolve(&event)?.emit(level, message, &record)
    }

    /// Applies a new configuration and identity.
    ///
    /// The sampling rate and stream names change immediately. The dispatch
    /// queue is replaced without dropping buffered records; a record always
    /// carries the stream names of the generation that writes it.
    pub fn reconfigure(
        &self,
        config: &PipelineConfig,
        identity: ServerIdentity,
    ) -> TelemetryResult<()> {
        let mut routing = self.routing.write();
        let writer = Arc::new(RecordWriter::new(Arc::clone(routing.writer.sink()), identity));
        self.dispatcher
            .reconfigure(Arc::clone(&writer), DispatchSettings::from_config(config))?;
        *routing = Routing {
            streams: config.streams.clone(),
            writer,
        };
        drop(routing);
        self.sampler.set_percent(config.access_percent());
        Ok(())
    }

    /// Drains buffered records and stops the writers.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Returns the identity currently stamped on records.
    #[must_use]
    pub fn identity(&self) -> ServerIdentity {
        self.routing.read().writer.identity().clone()
    }

    /// Returns the sampler.
    #[must_use]
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    /// Returns the record pool counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.pool.stats()
    }
}

impl std::fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipeline")
            .field("dispatcher", &self.dispatcher)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

fn is_valid_action(action: &str) -> bool {
    let mut chars = action.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use nano_core::{keys, RequestType, ServerError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx() -> RequestContext {
        RequestContext::base(RequestType::Rest)
            .append([keys::REQUEST_ID, "req-9", keys::REQUEST_FUNC, "GET /ping"])
            .unwrap()
    }

    fn pipeline(config: &PipelineConfig, sink: &MemorySink) -> LogPipeline {
        LogPipeline::start(
            config,
            ServerIdentity::new("ping", "infra"),
            Arc::new(sink.clone()),
        )
        .unwrap()
    }

    fn ratio(sampler: &Sampler, draws: u32) -> f64 {
        let mut rng = StdRng::seed_from_u64(7);
        let hits = (0..draws).filter(|_| sampler.should_emit_with(&mut rng)).count();
        hits as f64 / f64::from(draws)
    }

    #[test]
    fn test_sampler_bounds() {
        assert!((ratio(&Sampler::new(0), 10_000) - 0.0).abs() < f64::EPSILON);
        assert!((ratio(&Sampler::new(100), 10_000) - 1.0).abs() < f64::EPSILON);
        assert_eq!(Sampler::new(250).percent(), 100);
    }

    #[test]
    fn test_sampler_converges() {
        let observed = ratio(&Sampler::new(30), 100_000);
        assert!((observed - 0.30).abs() < 0.01, "observed {observed}");

        let observed = ratio(&Sampler::new(1), 100_000);
        assert!((observed - 0.01).abs() < 0.003, "observed {observed}");
    }

    #[test]
    fn test_access_and_failures_reach_their_streams() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default(), &sink);
        let registry = nano_core::ErrorRegistry::new();

        assert!(logs.access(&ctx(), Duration::from_millis(4)));
        let declared = Failure::Declared(ServerError::project_match());
        assert!(logs.failure(&ctx(), &declared, Duration::from_millis(1)));
        let panic = Failure::from_panic(Box::new("boom"), &registry);
        assert!(logs.failure(&ctx(), &panic, Duration::from_millis(1)));
        logs.shutdown();

        let access = sink.records_for("access");
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].record.event, "infra_ping_access");
        assert_eq!(access[0].level, Level::INFO);

        let warn = sink.records_for("warning");
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].record.error_code.as_deref(), Some("10003"));
        assert_eq!(warn[0].record.event, "infra_ping_error");

        let error = sink.records_for("error");
        assert_eq!(error.len(), 1);
        assert_eq!(error[0].record.error_code.as_deref(), Some("10000"));
        assert_eq!(error[0].record.reason.as_deref(), Some("boom"));
        assert_eq!(error[0].level, Level::ERROR);
    }

    #[test]
    fn test_zero_percent_suppresses_access() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default().with_access_log_percent(0), &sink);
        for _ in 0..50 {
            assert!(!logs.access(&ctx(), Duration::from_millis(1)));
        }
        logs.shutdown();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_stream_overrides() {
        let sink = MemorySink::new();
        let mut config = PipelineConfig::default();
        config.streams.access = "ping-access".into();
        let logs = pipeline(&config, &sink);
        logs.access(&ctx(), Duration::from_millis(1));
        logs.shutdown();
        assert_eq!(sink.records_for("ping-access").len(), 1);
    }

    #[test]
    fn test_reconfigure_changes_identity_and_sampling() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default(), &sink);
        logs.reconfigure(
            &PipelineConfig::default().with_access_log_percent(0).with_writers(2),
            ServerIdentity::new("pong", "infra"),
        )
        .unwrap();

        assert_eq!(logs.sampler().percent(), 0);
        assert_eq!(logs.dispatcher().settings().unwrap().writers, 2);
        logs.error(&ctx(), "10001", "oops", Duration::from_millis(1));
        logs.shutdown();
        assert_eq!(sink.records_for("error")[0].record.event, "infra_pong_error");
    }

    #[test]
    fn test_stream_rename_matches_identity_under_load() {
        let sink = MemorySink::new();
        let logs = Arc::new(pipeline(&PipelineConfig::default(), &sink));

        let producer = {
            let logs = Arc::clone(&logs);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    logs.access(&ctx(), Duration::from_millis(1));
                }
            })
        };
        let mut renamed = PipelineConfig::default();
        renamed.streams.access = "pong-access".into();
        logs.reconfigure(&renamed, ServerIdentity::new("pong", "infra"))
            .unwrap();
        producer.join().unwrap();
        logs.access(&ctx(), Duration::from_millis(1));
        logs.shutdown();

        assert_eq!(sink.len(), 2_001);
        for captured in sink.records_for("access") {
            assert_eq!(captured.record.log_server, "ping");
        }
        let renamed = sink.records_for("pong-access");
        assert!(!renamed.is_empty());
        for captured in renamed {
            assert_eq!(captured.record.log_server, "pong");
        }
    }

    #[test]
    fn test_after_shutdown_nothing_is_dispatched() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default(), &sink);
        logs.shutdown();
        assert!(!logs.access(&ctx(), Duration::from_millis(1)));
        assert_eq!(logs.stats().rejected, 1);
    }

    #[test]
    fn test_project_record() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default(), &sink);
        logs.project(
            Level::INFO,
            "refund issued",
            "refund",
            Some(&ctx()),
            &[("amount", Value::from(12)), ("currency", Value::from("EUR"))],
        )
        .unwrap();

        let records = sink.records_for("infra_ping_refund");
        assert_eq!(records.len(), 1);
        let record = &records[0].record;
        assert_eq!(record.log_type, "project");
        assert_eq!(record.request_id, "req-9");
        assert_eq!(record.properties["refund_amount"], 12);
        assert_eq!(record.properties["refund_currency"], "EUR");
        assert_eq!(record.properties["log_act"], "refund");
    }

    #[test]
    fn test_project_action_validation() {
        let sink = MemorySink::new();
        let logs = pipeline(&PipelineConfig::default(), &sink);
        for bad in ["", "1refund", "re fund", "refund!"] {
            assert!(logs.project(Level::INFO, "m", bad, None, &[]).is_err(), "{bad}");
        }
        assert!(logs.project(Level::WARN, "m", "a-b_c9", None, &[]).is_ok());
    }
}
