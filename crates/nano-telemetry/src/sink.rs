//! Structured sinks.
//!
//! A [`Sink`] resolves stream names to [`StreamHandle`]s that write
//! [`SinkRecord`]s. Three sinks are provided:
//!
//! - [`TracingSink`] forwards records as `tracing` events
//! - [`DirectorySink`] appends JSON lines to one file per stream
//! - [`MemorySink`] keeps records in memory

use crate::error::TelemetryError;
use crate::record::SinkRecord;
use crate::TelemetryResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

/// Target used for events emitted by [`TracingSink`].
pub const SINK_TARGET: &str = "nano::sink";

/// A destination for log records.
pub trait Sink: Send + Sync + 'static {
    /// Returns a handle for the named stream.
    ///
    /// Fails with [`TelemetryError::SinkUnavailable`] when the stream
    /// cannot be opened.
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>>;
}

/// An open log stream.
pub trait StreamHandle: Send + Sync {
    /// Writes one record.
    fn emit(&self, level: Level, message: &str, record: &SinkRecord) -> TelemetryResult<()>;
}

// ============================================================================
// TracingSink
// ============================================================================

/// Forwards records to the installed `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Creates a tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Sink for TracingSink {
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>> {
        Ok(Arc::new(TracingStream {
            stream: stream.to_string(),
        }))
    }
}

struct TracingStream {
    stream: String,
}

macro_rules! sink_event {
    ($level:expr, $stream:expr, $message:expr, $r:expr) => {
        tracing::event!(
            target: SINK_TARGET,
            $level,
            stream = %$stream,
            log_type = %$r.log_type,
            event = %$r.event,
            "logServer" = %$r.log_server,
            "logServerGroup" = %$r.log_server_group,
            "requestType" = %$r.request_type,
            "requestFunc" = %$r.request_func,
            "fromApp" = %$r.from_app,
            "fromProject" = %$r.from_project,
            "requestId" = %$r.request_id,
            "clientIp" = %$r.client_ip,
            "user-agent" = %$r.user_agent,
            time = $r.time,
            error_code = $r.error_code.as_deref(),
            query = $r.query.as_deref(),
            reason = $r.reason.as_deref(),
            properties = tracing::field::debug(&$r.properties),
            "{}",
            $message
        )
    };
}

impl StreamHandle for TracingStream {
    fn emit(&self, level: Level, message: &str, record: &SinkRecord) -> TelemetryResult<()> {
        match level {
            Level::ERROR => sink_event!(Level::ERROR, self.stream, message, record),
            Level::WARN => sink_event!(Level::WARN, self.stream, message, record),
            Level::INFO => sink_event!(Level::INFO, self.stream, message, record),
            Level::DEBUG => sink_event!(Level::DEBUG, self.stream, message, record),
            _ => sink_event!(Level::TRACE, self.stream, message, record),
        }
        Ok(())
    }
}

// ============================================================================
// DirectorySink
// ============================================================================

/// Writes each stream as JSON lines to `<dir>/<stream>.log`.
///
/// Handles are opened lazily and cached per stream.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    handles: Mutex<HashMap<String, Arc<FileStream>>>,
}

impl DirectorySink {
    /// Creates a sink writing under `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> TelemetryResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the path a stream is written to.
    #[must_use]
    pub fn stream_path(&self, stream: &str) -> PathBuf {
        self.dir.join(format!("{stream}.log"))
    }
}

impl Sink for DirectorySink {
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>> {
        if stream.is_empty()
            || stream.contains(['/', '\\'])
            || stream.starts_with('.')
        {
            return Err(TelemetryError::sink_unavailable(stream, "invalid stream name"));
        }

        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(stream) {
            return Ok(Arc::clone(handle) as Arc<dyn StreamHandle>);
        }

        let path = self.stream_path(stream);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TelemetryError::sink_unavailable(stream, e))?;
        tracing::debug!(stream, path = %path.display(), "opened log stream");

        let handle = Arc::new(FileStream {
            stream: stream.to_string(),
            writer: Mutex::new(LineWriter::new(file)),
        });
        handles.insert(stream.to_string(), Arc::clone(&handle));
        Ok(handle)
    }
}

#[derive(Debug)]
struct FileStream {
    stream: String,
    writer: Mutex<LineWriter<File>>,
}

#[derive(Serialize)]
struct FileLine<'a> {
    ts: String,
    level: &'a str,
    msg: &'a str,
    #[serde(flatten)]
    record: &'a SinkRecord,
}

impl StreamHandle for FileStream {
    fn emit(&self, level: Level, message: &str, record: &SinkRecord) -> TelemetryResult<()> {
        let line = FileLine {
            ts: chrono::Utc::now().to_rfc3339(),
            level: level.as_str(),
            msg: message,
            record,
        };
        let mut bytes =
            serde_json::to_vec(&line).map_err(|e| TelemetryError::emit(&self.stream, e))?;
        bytes.push(b'\n');
        self.writer
            .lock()
            .write_all(&bytes)
            .map_err(|e| TelemetryError::emit(&self.stream, e))
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// A record captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRecord {
    /// Stream name.
    pub stream: String,
    /// Level emitted at.
    pub level: Level,
    /// Message.
    pub message: String,
    /// The record.
    pub record: SinkRecord,
}

/// Keeps every record in memory.
///
/// Streams can be marked unavailable to exercise failure handling.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    unavailable: Arc<Mutex<HashSet<String>>>,
}

impl MemorySink {
    /// Creates an empty memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `resolve` fail for `stream`.
    pub fn mark_unavailable(&self, stream: impl Into<String>) {
        self.unavailable.lock().insert(stream.into());
    }

    /// Returns a copy of every captured record.
    #[must_use]
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// Returns the records written to `stream`.
    #[must_use]
    pub fn records_for(&self, stream: &str) -> Vec<CapturedRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.stream == stream)
            .cloned()
            .collect()
    }

    /// Number of captured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drops all captured records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Sink for MemorySink {
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>> {
        if self.unavailable.lock().contains(stream) {
            return Err(TelemetryError::sink_unavailable(stream, "marked unavailable"));
        }
        Ok(Arc::new(MemoryStream {
            stream: stream.to_string(),
            records: Arc::clone(&self.records),
        }))
    }
}

struct MemoryStream {
    stream: String,
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

impl StreamHandle for MemoryStream {
    fn emit(&self, level: Level, message: &str, record: &SinkRecord) -> TelemetryResult<()> {
        self.records.lock().push(CapturedRecord {
            stream: self.stream.clone(),
            level,
            message: message.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}
