//! Request logging for nano services.
//!
//! Recovery boundaries report each finished request here. Records are
//! pooled, sampled, and written off the request path by a resizable pool of
//! writer threads:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         nano service                           │
//! │                                                                │
//! │   recovery boundary ──▶ LogPipeline                            │
//! │                           │  Sampler (access only)             │
//! │                           │  RecordPool ──▶ PooledRecord       │
//! │                           ▼                                    │
//! │                        Dispatcher                              │
//! │                  [ bounded queue ] ──▶ writer threads          │
//! │                                             │                  │
//! └─────────────────────────────────────────────┼──────────────────┘
//!                                               ▼
//!                     Sink: TracingSink │ DirectorySink │ MemorySink
//! ```
//!
//! # Streams
//!
//! | Record | `log_type` | `event` | Default stream |
//! |--------|------------|---------|----------------|
//! | success | `access` | `<group>_<name>_access` | `access` |
//! | declared failure | `warning` | `<group>_<name>_error` | `warning` |
//! | unclassified failure | `error` | `<group>_<name>_error` | `error` |
//! | project record | `project` | `<group>_<name>_<action>` | the event |
//!
//! # Example
//!
//! ```rust,ignore
//! use nano_telemetry::{LogPipeline, PipelineConfig, ServerIdentity, TracingSink};
//! use std::sync::Arc;
//!
//! let logs = LogPipeline::start(
//!     &PipelineConfig::default(),
//!     ServerIdentity::new("orders", "shop"),
//!     Arc::new(TracingSink::new()),
//! )?;
//! logs.access(&ctx, started.elapsed());
//! logs.shutdown();
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod sink;

pub use config::{PipelineConfig, ServerIdentity, StreamNames};
pub use dispatch::{DispatchSettings, DispatchStatsSnapshot, Dispatcher, RecordWriter};
pub use error::TelemetryError;
pub use logging::{init_logging, request_span, LogConfig};
pub use metrics::{init_metrics, MetricsRegistry};
pub use pipeline::{LogPipeline, Sampler};
pub use pool::{PoolStatsSnapshot, PooledRecord, RecordPool};
pub use record::{LogKind, LogRecord, SinkRecord};
pub use sink::{CapturedRecord, DirectorySink, MemorySink, Sink, StreamHandle, TracingSink};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
