use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counts reported by a sink when it is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub persisted: usize,
    pub ignored: usize,
}

/// Destination for records or completed events.
///
/// Sinks are shared between worker threads, so both calls take `&self`.
/// Anything added after `close` is counted as ignored.
pub trait OutputSink<T>: Send + Sync {
    fn add_record(&self, item: T);
    fn close(&self) -> SinkSummary;
}

#[derive(Debug, Default)]
struct SinkCounters {
    persisted: AtomicUsize,
    ignored: AtomicUsize,
    closed: AtomicBool,
}

impl SinkCounters {
    fn persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    fn ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> SinkSummary {
        self.closed.store(true, Ordering::Release);
        self.summary()
    }

    fn summary(&self) -> SinkSummary {
        SinkSummary {
            persisted: self.persisted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Keeps everything in memory
#[derive(Debug)]
pub struct MemorySink<T> {
    items: Mutex<Vec<T>>,
    counters: SinkCounters,
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            counters: SinkCounters::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Clone> MemorySink<T> {
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> OutputSink<T> for MemorySink<T> {
    fn add_record(&self, item: T) {
        if self.counters.is_closed() {
            self.counters.ignored();
            return;
        }
        self.items.lock().push(item);
        self.counters.persisted();
    }

    fn close(&self) -> SinkSummary {
        self.counters.close()
    }
}

/// Forwards items over a bounded channel; blocks when the consumer falls behind.
///
/// Closing drops the sender so the receiving side sees the end of the stream.
pub struct ChannelSink<T> {
    sender: Mutex<Option<Sender<T>>>,
    counters: SinkCounters,
}

impl<T> ChannelSink<T> {
    pub fn bounded(capacity: usize) -> (Self, Receiver<T>) {
        let (sender, receiver) = bounded(capacity);
        let sink = Self {
            sender: Mutex::new(Some(sender)),
            counters: SinkCounters::default(),
        };
        (sink, receiver)
    }
}

impl<T: Send> OutputSink<T> for ChannelSink<T> {
    fn add_record(&self, item: T) {
        // Clone the sender so a full channel never blocks other producers on the lock
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) if sender.send(item).is_ok() => self.counters.persisted(),
            _ => self.counters.ignored(),
        }
    }

    fn close(&self) -> SinkSummary {
        self.sender.lock().take();
        self.counters.close()
    }
}

/// Writes each item as one JSON line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
    counters: SinkCounters,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            counters: SinkCounters::default(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<T: Serialize, W: Write + Send> OutputSink<T> for JsonLinesSink<W> {
    fn add_record(&self, item: T) {
        if self.counters.is_closed() {
            self.counters.ignored();
            return;
        }

        let line = match serde_json::to_string(&item) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize item: {}", e);
                self.counters.ignored();
                return;
            }
        };

        let mut writer = self.writer.lock();
        match writeln!(writer, "{}", line) {
            Ok(()) => self.counters.persisted(),
            Err(e) => {
                tracing::warn!("Failed to write item: {}", e);
                self.counters.ignored();
            }
        }
    }

    fn close(&self) -> SinkSummary {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!("Failed to flush output: {}", e);
        }
        self.counters.close()
    }
}
