//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `nano_log_records_enqueued_total` | Counter | Records accepted by the queue |
//! | `nano_log_records_written_total` | Counter | Records written by a sink |
//! | `nano_log_sink_failures_total` | Counter | Records a sink failed to write |
//! | `nano_log_worker_panics_total` | Counter | Writer threads that panicked |
//! | `nano_log_workers_replaced_total` | Counter | Writer threads respawned |
//! | `nano_log_records_rejected_total` | Counter | Records offered to a closed queue |
//! | `nano_log_records_sampled_out_total` | Counter | Access records skipped by sampling |
//! | `nano_log_live_workers` | Gauge | Writer threads currently running |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Records accepted by the queue.
pub const RECORDS_ENQUEUED: &str = "nano_log_records_enqueued_total";
/// Records written by a sink.
pub const RECORDS_WRITTEN: &str = "nano_log_records_written_total";
/// Records a sink failed to write.
pub const SINK_FAILURES: &str = "nano_log_sink_failures_total";
/// Writer threads that panicked.
pub const WORKER_PANICS: &str = "nano_log_worker_panics_total";
/// Writer threads respawned.
pub const WORKERS_REPLACED: &str = "nano_log_workers_replaced_total";
/// Records offered to a closed queue.
pub const RECORDS_REJECTED: &str = "nano_log_records_rejected_total";
/// Access records skipped by sampling.
pub const RECORDS_SAMPLED_OUT: &str = "nano_log_records_sampled_out_total";
/// Writer threads currently running.
pub const LIVE_WORKERS: &str = "nano_log_live_workers";

/// Registers descriptions for the pipeline metrics.
pub fn describe_pipeline_metrics() {
    describe_counter!(RECORDS_ENQUEUED, "Log records accepted by the dispatch queue");
    describe_counter!(RECORDS_WRITTEN, "Log records written by a sink");
    describe_counter!(SINK_FAILURES, "Log records a sink failed to write");
    describe_counter!(WORKER_PANICS, "Log writer threads that panicked");
    describe_counter!(WORKERS_REPLACED, "Log writer threads respawned after a panic");
    describe_counter!(RECORDS_REJECTED, "Log records offered to a closed queue");
    describe_counter!(RECORDS_SAMPLED_OUT, "Access records skipped by sampling");
    describe_gauge!(LIVE_WORKERS, "Log writer threads currently running");
}

/// Handle onto an installed Prometheus recorder.
///
/// Owned by whoever installed it; there is no process-wide copy.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps a recorder handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs a Prometheus recorder as the `metrics` facade's recorder and
/// describes the pipeline metrics.
///
/// The returned registry renders the exposition; the caller serves it on
/// whatever endpoint it exposes. Fails with
/// [`TelemetryError::MetricsInit`] if a recorder is already installed.
pub fn init_metrics() -> TelemetryResult<MetricsRegistry> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    describe_pipeline_metrics();
    Ok(MetricsRegistry::new(handle))
}
