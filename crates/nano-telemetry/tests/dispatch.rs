//! Dispatch queue behavior under concurrency: ordering, resizing,
//! backpressure and writer replacement.

use nano_telemetry::{
    DispatchSettings, Dispatcher, LogKind, MemorySink, PooledRecord, RecordPool, RecordWriter,
    ServerIdentity, Sink, SinkRecord, StreamHandle, TelemetryResult,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;

const WAIT: Duration = Duration::from_secs(10);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn writer(sink: Arc<dyn Sink>) -> Arc<RecordWriter> {
    Arc::new(RecordWriter::new(sink, ServerIdentity::new("orders", "shop")))
}

fn record(pool: &Arc<RecordPool>, stream: &str) -> PooledRecord {
    let mut record = pool.acquire(LogKind::Access);
    record.stream.push_str(stream);
    record
}

/// Holds every write until the gate opens.
#[derive(Clone, Default)]
struct GateSink {
    gate: Arc<(Mutex<bool>, Condvar)>,
    inner: MemorySink,
}

impl GateSink {
    fn open(&self) {
        let (open, signal) = &*self.gate;
        *open.lock() = true;
        signal.notify_all();
    }
}

struct GateStream {
    gate: Arc<(Mutex<bool>, Condvar)>,
    inner: Arc<dyn StreamHandle>,
}

impl Sink for GateSink {
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>> {
        Ok(Arc::new(GateStream {
            gate: Arc::clone(&self.gate),
            inner: self.inner.resolve(stream)?,
        }))
    }
}

impl StreamHandle for GateStream {
    fn emit(&self, level: Level, message: &str, record: &SinkRecord) -> TelemetryResult<()> {
        let (open, signal) = &*self.gate;
        let mut open = open.lock();
        while !*open {
            signal.wait(&mut open);
        }
        drop(open);
        self.inner.emit(level, message, record)
    }
}

/// Panics on the `explode` stream, writes everything else.
#[derive(Clone, Default)]
struct ExplodingSink {
    inner: MemorySink,
}

impl Sink for ExplodingSink {
    fn resolve(&self, stream: &str) -> TelemetryResult<Arc<dyn StreamHandle>> {
        assert!(stream != "explode", "sink exploded on purpose");
        self.inner.resolve(stream)
    }
}

#[test]
fn test_resize_under_load_loses_nothing() {
    let sink = MemorySink::new();
    let pool = RecordPool::new(256);
    let dispatcher = Dispatcher::start(
        writer(Arc::new(sink.clone())),
        DispatchSettings::new(2, 200),
    )
    .unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..250 {
                    dispatcher.dispatch(record(&pool, "access")).unwrap();
                }
            });
        }
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(2));
            dispatcher
                .reconfigure(writer(Arc::new(sink.clone())), DispatchSettings::new(5, 400))
                .unwrap();
        });
    });

    assert_eq!(dispatcher.settings(), Some(DispatchSettings::new(5, 400)));
    assert!(
        wait_until(|| dispatcher.stats().live_workers == 5),
        "live workers: {}",
        dispatcher.stats().live_workers
    );

    dispatcher.shutdown();
    let stats = dispatcher.stats();
    assert_eq!(stats.enqueued, 1000);
    assert_eq!(stats.written, 1000);
    assert_eq!(sink.records_for("access").len(), 1000);
    assert_eq!(stats.live_workers, 0);
}

#[test]
fn test_single_writer_preserves_order() {
    let sink = MemorySink::new();
    let pool = RecordPool::new(256);
    let dispatcher = Dispatcher::start(
        writer(Arc::new(sink.clone())),
        DispatchSettings::new(1, 200),
    )
    .unwrap();

    for seq in 0..500 {
        let mut record = pool.acquire(LogKind::Warn);
        record.stream.push_str("warning");
        record.reason.push_str(&seq.to_string());
        dispatcher.dispatch(record).unwrap();
    }
    dispatcher.shutdown();

    let received: Vec<String> = sink
        .records_for("warning")
        .into_iter()
        .filter_map(|captured| captured.record.reason)
        .collect();
    let expected: Vec<String> = (0..500).map(|seq: i32| seq.to_string()).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_full_queue_blocks_producers() {
    let sink = GateSink::default();
    let pool = RecordPool::new(256);
    let dispatcher = Dispatcher::start(
        writer(Arc::new(sink.clone())),
        DispatchSettings::new(1, 200),
    )
    .unwrap();

    // The single writer picks this one up and parks at the gate.
    dispatcher.dispatch(record(&pool, "access")).unwrap();
    assert!(wait_until(|| dispatcher.queue_len() == 0));

    for _ in 0..200 {
        dispatcher.dispatch(record(&pool, "access")).unwrap();
    }
    assert_eq!(dispatcher.queue_len(), 200);

    let finished = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            dispatcher.dispatch(record(&pool, "access")).unwrap();
            finished.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!finished.load(Ordering::SeqCst), "producer should be blocked");
        sink.open();
    });
    assert!(finished.load(Ordering::SeqCst));

    dispatcher.shutdown();
    assert_eq!(dispatcher.stats().written, 202);
    assert_eq!(sink.inner.len(), 202);
}

#[test]
fn test_panicking_writer_is_replaced() {
    let sink = ExplodingSink::default();
    let pool = RecordPool::new(256);
    let dispatcher = Dispatcher::start(
        writer(Arc::new(sink.clone())),
        DispatchSettings::new(3, 200),
    )
    .unwrap();

    dispatcher.dispatch(record(&pool, "explode")).unwrap();
    assert!(wait_until(|| dispatcher.stats().replacements == 1));
    assert!(wait_until(|| dispatcher.stats().live_workers == 3));

    for _ in 0..10 {
        dispatcher.dispatch(record(&pool, "access")).unwrap();
    }
    dispatcher.shutdown();

    let stats = dispatcher.stats();
    assert_eq!(stats.worker_panics, 1);
    assert_eq!(stats.replacements, 1);
    assert_eq!(stats.written, 10);
    assert_eq!(sink.inner.records_for("access").len(), 10);
    assert!(sink.inner.records_for("explode").is_empty());
}

#[test]
fn test_repeated_panics_keep_pool_at_size() {
    let sink = ExplodingSink::default();
    let pool = RecordPool::new(256);
    let dispatcher = Dispatcher::start(
        writer(Arc::new(sink.clone())),
        DispatchSettings::new(2, 200),
    )
    .unwrap();

    for _ in 0..5 {
        dispatcher.dispatch(record(&pool, "explode")).unwrap();
    }
    assert!(wait_until(|| dispatcher.stats().replacements == 5));
    assert!(wait_until(|| dispatcher.stats().live_workers == 2));

    dispatcher.dispatch(record(&pool, "access")).unwrap();
    dispatcher.shutdown();
    assert_eq!(sink.inner.records_for("access").len(), 1);
}
