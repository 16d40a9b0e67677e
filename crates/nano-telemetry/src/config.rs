//! Log pipeline configuration.

use crate::record::LogKind;
use serde::{Deserialize, Serialize};

/// Default share of successful requests that produce an access record.
pub const DEFAULT_ACCESS_LOG_PERCENT: i64 = 100;
/// Default number of writer threads.
pub const DEFAULT_WRITERS: i64 = 4;
/// Smallest allowed writer count.
pub const MIN_WRITERS: i64 = 1;
/// Largest allowed writer count.
pub const MAX_WRITERS: i64 = 50;
/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: i64 = 10_000;
/// Smallest allowed queue capacity.
pub const MIN_QUEUE_CAPACITY: i64 = 200;
/// Largest allowed queue capacity.
pub const MAX_QUEUE_CAPACITY: i64 = 20_000;

/// Configuration of the log pipeline.
///
/// Values are stored as given and clamped when read, so an out-of-range
/// setting never fails startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Percentage of successful requests that emit an access record.
    pub access_log_percent: i64,

    /// Number of writer threads.
    pub writers: i64,

    /// Capacity of the dispatch queue.
    pub queue_capacity: i64,

    /// Stream names per record type.
    pub streams: StreamNames,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            access_log_percent: DEFAULT_ACCESS_LOG_PERCENT,
            writers: DEFAULT_WRITERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            streams: StreamNames::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the access log percentage.
    #[must_use]
    pub fn with_access_log_percent(mut self, percent: i64) -> Self {
        self.access_log_percent = percent;
        self
    }

    /// Sets the writer count.
    #[must_use]
    pub fn with_writers(mut self, writers: i64) -> Self {
        self.writers = writers;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: i64) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Access log percentage clamped to `0..=100`.
    #[must_use]
    pub fn access_percent(&self) -> u8 {
        u8::try_from(self.access_log_percent.clamp(0, 100)).unwrap_or(100)
    }

    /// Writer count clamped to `1..=50`.
    #[must_use]
    pub fn writer_count(&self) -> usize {
        clamp_usize(self.writers, MIN_WRITERS, MAX_WRITERS)
    }

    /// Queue capacity clamped to `200..=20000`.
    #[must_use]
    pub fn capacity(&self) -> usize {
        clamp_usize(self.queue_capacity, MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY)
    }
}

fn clamp_usize(value: i64, min: i64, max: i64) -> usize {
    usize::try_from(value.clamp(min, max)).unwrap_or(1)
}

/// Stream names, overridable per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamNames {
    /// Unclassified failures.
    pub error: String,
    /// Successful requests.
    pub access: String,
    /// Declared failures.
    pub warn: String,
    /// Database statements.
    pub mysql: String,
    /// Cache commands.
    pub redis: String,
    /// Async jobs.
    #[serde(rename = "async")]
    pub async_jobs: String,
    /// Subscription consumers.
    pub subscribe: String,
    /// Outbound requests.
    pub request: String,
}

impl Default for StreamNames {
    fn default() -> Self {
        Self {
            error: "error".to_string(),
            access: "access".to_string(),
            warn: "warning".to_string(),
            mysql: "mysql".to_string(),
            redis: "redis".to_string(),
            async_jobs: "async".to_string(),
            subscribe: "subscribe".to_string(),
            request: "request".to_string(),
        }
    }
}

impl StreamNames {
    /// Returns the stream a record of `kind` is written to.
    #[must_use]
    pub fn for_kind(&self, kind: LogKind) -> &str {
        match kind {
            LogKind::Access => &self.access,
            LogKind::Warn => &self.warn,
            LogKind::Error => &self.error,
        }
    }
}

/// Identity of the local service, stamped on every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Service name.
    pub name: String,
    /// Service group (project).
    pub group: String,
}

impl ServerIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Returns `<group>_<name>_<suffix>`.
    #[must_use]
    pub fn event(&self, suffix: &str) -> String {
        format!("{}_{}_{}", self.group, self.name, suffix)
    }
}
