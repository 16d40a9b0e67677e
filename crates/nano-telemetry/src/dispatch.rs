//! Dispatch queue and writer pool.
//!
//! Records travel from request handlers to sinks through a bounded queue
//! drained by a pool of writer threads. A *generation* is one queue plus
//! the threads draining it:
//!
//! ```text
//!  producers ──send──▶ [ bounded queue ] ──recv──▶ writer-0 ─┐
//!   (block when full)                     ──recv──▶ writer-1 ─┼─▶ Sink
//!                                          ──recv──▶ writer-N ─┘
//!                                                      │ panic
//!                                   supervisor ◀── replacement token
//! ```
//!
//! Resizing installs a new generation and closes the old queue; the old
//! writers drain what is buffered and exit, so nothing is discarded. A
//! writer whose sink call panics sends one replacement token to its
//! supervisor and exits; the supervisor starts exactly one new writer per
//! token.

use crate::config::{PipelineConfig, ServerIdentity};
use crate::error::TelemetryError;
use crate::metrics as names;
use crate::pool::PooledRecord;
use crate::record::LogRecord;
use crate::sink::Sink;
use crate::TelemetryResult;
use crossbeam_channel::{Receiver, Sender};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Writes records to a sink on behalf of the local service.
pub struct RecordWriter {
    sink: Arc<dyn Sink>,
    identity: ServerIdentity,
}

impl RecordWriter {
    /// Creates a writer stamping records with `identity`.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, identity: ServerIdentity) -> Self {
        Self { sink, identity }
    }

    /// Returns the identity stamped on records.
    #[must_use]
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Returns the sink records are written to.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Resolves the record's stream and writes the record to it.
    pub fn write(&self, record: &LogRecord) -> TelemetryResult<()> {
        let handle = self.sink.resolve(&record.stream)?;
        let out = record.to_sink_record(&self.identity);
        handle.emit(record.kind.level(), record.kind.log_type(), &out)
    }
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Size of one dispatch generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Writer threads.
    pub writers: usize,
    /// Queue capacity.
    pub capacity: usize,
}

impl DispatchSettings {
    /// Creates settings, clamping both values to their allowed ranges.
    #[must_use]
    pub fn new(writers: usize, capacity: usize) -> Self {
        let config = PipelineConfig {
            writers: i64::try_from(writers).unwrap_or(i64::MAX),
            queue_capacity: i64::try_from(capacity).unwrap_or(i64::MAX),
            ..PipelineConfig::default()
        };
        Self::from_config(&config)
    }

    /// Reads the clamped settings from a pipeline configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            writers: config.writer_count(),
            capacity: config.capacity(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    written: AtomicU64,
    sink_failures: AtomicU64,
    worker_panics: AtomicU64,
    replacements: AtomicU64,
    rejected: AtomicU64,
    live_workers: AtomicUsize,
}

impl DispatchStats {
    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(names::RECORDS_ENQUEUED).increment(1);
    }

    fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
        counter!(names::RECORDS_WRITTEN).increment(1);
    }

    fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::SINK_FAILURES).increment(1);
    }

    fn record_panic(&self) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
        counter!(names::WORKER_PANICS).increment(1);
    }

    fn record_replacement(&self) {
        self.replacements.fetch_add(1, Ordering::Relaxed);
        counter!(names::WORKERS_REPLACED).increment(1);
    }

    fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!(names::RECORDS_REJECTED).increment(1);
    }

    fn worker_started(&self) {
        let live = self.live_workers.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!(names::LIVE_WORKERS).set(live as f64);
    }

    fn worker_stopped(&self) {
        let live = self.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(names::LIVE_WORKERS).set(live as f64);
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::SeqCst),
        }
    }
}

/// A point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStatsSnapshot {
    /// Records accepted by a queue.
    pub enqueued: u64,
    /// Records a sink wrote.
    pub written: u64,
    /// Records a sink failed to write.
    pub sink_failures: u64,
    /// Writers that panicked.
    pub worker_panics: u64,
    /// Writers started to replace a panicked one.
    pub replacements: u64,
    /// Records offered after shutdown.
    pub rejected: u64,
    /// Writers currently running, across all generations.
    pub live_workers: usize,
}

struct Generation {
    id: u64,
    settings: DispatchSettings,
    sender: Sender<PooledRecord>,
    supervisor: JoinHandle<()>,
}

/// Sent by a panicking writer; carries the control sender for its successor.
struct Replacement {
    control: Sender<Replacement>,
}

#[derive(Clone)]
struct WorkerContext {
    generation: u64,
    queue: Receiver<PooledRecord>,
    writer: Arc<RecordWriter>,
    stats: Arc<DispatchStats>,
}

/// Bounded queue plus a self-healing, resizable pool of writer threads.
pub struct Dispatcher {
    current: RwLock<Option<Generation>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<DispatchStats>,
    generations: AtomicU64,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Starts the first generation.
    ///
    /// Fails with [`TelemetryError::NoWriters`] if no writer thread starts.
    pub fn start(writer: Arc<RecordWriter>, settings: DispatchSettings) -> TelemetryResult<Self> {
        let dispatcher = Self {
            current: RwLock::new(None),
            retired: Mutex::new(Vec::new()),
            stats: Arc::new(DispatchStats::default()),
            generations: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        let generation = dispatcher.spawn_generation(writer, settings)?;
        *dispatcher.current.write() = Some(generation);
        Ok(dispatcher)
    }

    /// Enqueues a record, blocking while the queue is full.
    ///
    /// Fails with [`TelemetryError::QueueClosed`] after shutdown; the record
    /// then goes straight back to its pool.
    pub fn dispatch(&self, record: PooledRecord) -> TelemetryResult<()> {
        // Held across the send so a resize cannot close this queue under us.
        let current = self.current.read();
        let Some(generation) = current.as_ref() else {
            self.stats.record_rejected();
            return Err(TelemetryError::QueueClosed);
        };
        if generation.sender.send(record).is_err() {
            self.stats.record_rejected();
            return Err(TelemetryError::QueueClosed);
        }
        self.stats.record_enqueued();
        Ok(())
    }

    /// Replaces the running generation with one of the given size.
    ///
    /// Producers blocked on the old queue finish their sends first; the old
    /// writers then drain the old queue and exit. If no writer of the new
    /// generation starts, the running generation is kept.
    pub fn reconfigure(
        &self,
        writer: Arc<RecordWriter>,
        settings: DispatchSettings,
    ) -> TelemetryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TelemetryError::QueueClosed);
        }
        let next = self.spawn_generation(writer, settings)?;

        let previous = {
            let mut current = self.current.write();
            if self.closed.load(Ordering::SeqCst) {
                drop(current);
                let Generation {
                    sender, supervisor, ..
                } = next;
                drop(sender);
                join_supervisor(supervisor);
                return Err(TelemetryError::QueueClosed);
            }
            current.replace(next)
        };

        if let Some(previous) = previous {
            info!(
                generation = previous.id,
                writers = previous.settings.writers,
                capacity = previous.settings.capacity,
                "Retiring log dispatch generation"
            );
            let Generation {
                sender, supervisor, ..
            } = previous;
            drop(sender);
            let mut retired = self.retired.lock();
            retired.retain(|handle| !handle.is_finished());
            retired.push(supervisor);
        }
        Ok(())
    }

    /// Stops intake, drains every queue and joins all threads.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let current = self.current.write().take();
        let mut supervisors: Vec<_> = self.retired.lock().drain(..).collect();
        if let Some(generation) = current {
            debug!(generation = generation.id, "Closing log dispatch queue");
            drop(generation.sender);
            supervisors.push(generation.supervisor);
        }
        for supervisor in supervisors {
            join_supervisor(supervisor);
        }
    }

    /// Returns `true` until [`Dispatcher::shutdown`] is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current.read().is_some()
    }

    /// Returns the size of the running generation.
    #[must_use]
    pub fn settings(&self) -> Option<DispatchSettings> {
        self.current.read().as_ref().map(|g| g.settings)
    }

    /// Number of records waiting in the running generation's queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.current
            .read()
            .as_ref()
            .map_or(0, |g| g.sender.len())
    }

    /// Returns a snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    fn spawn_generation(
        &self,
        writer: Arc<RecordWriter>,
        settings: DispatchSettings,
    ) -> TelemetryResult<Generation> {
        let id = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, queue) = crossbeam_channel::bounded(settings.capacity);
        let context = WorkerContext {
            generation: id,
            queue,
            writer,
            stats: Arc::clone(&self.stats),
        };

        let (control, replacements) = crossbeam_channel::unbounded::<Replacement>();
        let workers: Vec<_> = (0..settings.writers)
            .filter_map(|index| spawn_worker(&context, index, control.clone()))
            .collect();
        // From here on only writers and in-flight tokens keep the channel open.
        drop(control);
        if workers.is_empty() {
            error!(generation = id, "No log writer could be started");
            return Err(TelemetryError::NoWriters { generation: id });
        }

        let started = workers.len();
        let supervisor = thread::Builder::new()
            .name(format!("nano-log-supervisor-{id}"))
            .spawn(move || supervise(&context, workers, &replacements))?;

        info!(
            generation = id,
            writers = started,
            capacity = settings.capacity,
            "Started log dispatch generation"
        );
        Ok(Generation {
            id,
            settings,
            sender,
            supervisor,
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn join_supervisor(supervisor: JoinHandle<()>) {
    if supervisor.join().is_err() {
        error!("Log dispatch supervisor panicked");
    }
}

fn supervise(
    context: &WorkerContext,
    mut workers: Vec<JoinHandle<()>>,
    replacements: &Receiver<Replacement>,
) {
    let mut next_index = workers.len();

    for Replacement { control } in replacements {
        context.stats.record_replacement();
        info!(
            generation = context.generation,
            worker = next_index,
            "Replacing panicked log writer"
        );
        workers.extend(spawn_worker(context, next_index, control));
        next_index += 1;
    }

    for worker in workers {
        let _ = worker.join();
    }
    debug!(generation = context.generation, "Log dispatch generation drained");
}

fn spawn_worker(
    context: &WorkerContext,
    index: usize,
    control: Sender<Replacement>,
) -> Option<JoinHandle<()>> {
    let worker = context.clone();
    context.stats.worker_started();
    let spawned = thread::Builder::new()
        .name(format!("nano-log-writer-{}-{index}", context.generation))
        .spawn(move || run_worker(&worker, index, &control));

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            context.stats.worker_stopped();
            error!(
                generation = context.generation,
                worker = index,
                error = %e,
                "Failed to spawn log writer"
            );
            None
        }
    }
}

struct LiveGuard<'a>(&'a DispatchStats);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_stopped();
    }
}

fn run_worker(context: &WorkerContext, index: usize, control: &Sender<Replacement>) {
    let _live = LiveGuard(&context.stats);
    debug!(generation = context.generation, worker = index, "Log writer started");

    for record in &context.queue {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.writer.write(&record)));
        match outcome {
            Ok(Ok(())) => context.stats.record_written(),
            Ok(Err(err)) => {
                context.stats.record_sink_failure();
                debug!(
                    stream = %record.stream,
                    error = %err,
                    "Dropped log record"
                );
            }
            Err(payload) => {
                context.stats.record_panic();
                error!(
                    generation = context.generation,
                    worker = index,
                    panic_message = %panic_message(payload.as_ref()),
                    "Log writer panicked"
                );
                drop(record);
                let token = Replacement {
                    control: control.clone(),
                };
                if control.send(token).is_err() {
                    error!(generation = context.generation, "Log supervisor is gone");
                }
                return;
            }
        }
        record.release();
    }

    debug!(generation = context.generation, worker = index, "Log writer exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
