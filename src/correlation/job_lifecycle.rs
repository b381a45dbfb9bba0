use crate::correlation::*;
use crate::error::EngineError;
use crate::models::StructuredRecord;
use crate::notifications::NotificationCollector;
use crate::sink::OutputSink;
use dashmap::DashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct QueuedRecord {
    is_begin: bool,
    record: StructuredRecord,
}

/// Timestamp, then file, then line
fn queue_order(a: &QueuedRecord, b: &QueuedRecord) -> Ordering {
    a.record
        .timestamp()
        .cmp(&b.record.timestamp())
        .then_with(|| a.record.metadata.file_path.cmp(&b.record.metadata.file_path))
        .then_with(|| a.record.line_number().cmp(&b.record.line_number()))
}

/// Queue-based pairing of job start/end records.
///
/// Records are buffered per key while input arrives. On shutdown each key's
/// queue is ordered and walked:
///
/// 1. pop a record; anything but a begin is discarded
/// 2. peek the next record: a matching end is consumed and the pair is
///    emitted as `Matched`
/// 3. anything else leaves the peeked record queued and emits the begin as
///    `TimedOut`, so one lost completion cannot shift every later pair
/// 4. an empty queue after a begin emits it as `FlushedIncomplete`
///
/// Peeking without consuming can still mis-pair a begin with a later end
/// when unrelated job types share a key. Keys are processed in parallel.
pub struct JobLifecycleCorrelator<R: CorrelationRule> {
    rule: R,
    queues: DashMap<R::Key, Vec<QueuedRecord>>,
    sink: Arc<dyn OutputSink<CompletedEvent<R::Key>>>,
    notifications: Arc<dyn NotificationCollector>,
    counters: EventCounters,
    shut_down: RwLock<bool>,
}

impl<R: CorrelationRule> JobLifecycleCorrelator<R> {
    pub fn new(
        rule: R,
        sink: Arc<dyn OutputSink<CompletedEvent<R::Key>>>,
        notifications: Arc<dyn NotificationCollector>,
    ) -> Self {
        Self {
            rule,
            queues: DashMap::new(),
            sink,
            notifications,
            counters: EventCounters::default(),
            shut_down: RwLock::new(false),
        }
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    /// Records buffered across all keys
    pub fn queued_len(&self) -> usize {
        self.queues.iter().map(|entry| entry.value().len()).sum()
    }

    fn emit(&self, event: CompletedEvent<R::Key>) {
        self.counters.record(event.status);
        self.sink.add_record(event);
    }

    fn pair_queue(&self, key: R::Key, mut queue: Vec<QueuedRecord>) {
        queue.sort_by(queue_order);
        let mut queue = queue.into_iter().peekable();

        while let Some(entry) = queue.next() {
            if !entry.is_begin {
                self.counters.unmatched_end();
                tracing::debug!(
                    reporter = self.rule.name(),
                    file = %entry.record.metadata.file_path,
                    line = entry.record.line_number(),
                    "Discarding end for {:?} with no open begin",
                    key
                );
                continue;
            }

            let paired = match queue.peek() {
                Some(next) => !next.is_begin && self.rule.is_matching_end(&entry.record, &next.record),
                None => {
                    self.emit(CompletedEvent::unmatched(
                        key.clone(),
                        entry.record,
                        CorrelationStatus::FlushedIncomplete,
                    ));
                    continue;
                }
            };

            if paired {
                if let Some(end) = queue.next() {
                    self.emit(CompletedEvent::matched(key.clone(), entry.record, end.record));
                }
            } else {
                self.emit(CompletedEvent::unmatched(
                    key.clone(),
                    entry.record,
                    CorrelationStatus::TimedOut,
                ));
            }
        }
    }
}

impl<R: CorrelationRule> EventCorrelator for JobLifecycleCorrelator<R> {
    fn reporter(&self) -> &str {
        self.rule.name()
    }

    fn observe(&self, record: &StructuredRecord) -> Result<(), EngineError> {
        let shut_down = self.shut_down.read();
        if *shut_down {
            return Err(EngineError::ObservedAfterShutdown {
                reporter: self.rule.name().to_string(),
            });
        }

        let (key, is_begin) = match self.rule.classify(record) {
            Classification::Begin(key) => (key, true),
            Classification::End(key) => (key, false),
            Classification::MissingKey { field } => {
                self.counters.missing_key();
                report_missing_key(self.notifications.as_ref(), self.rule.name(), record, &field);
                return Ok(());
            }
            Classification::Unrelated => return Ok(()),
        };

        self.queues.entry(key).or_default().push(QueuedRecord {
            is_begin,
            record: record.clone(),
        });
        Ok(())
    }

    fn shutdown(&self) -> Result<CorrelationSummary, EngineError> {
        {
            let mut shut_down = self.shut_down.write();
            if *shut_down {
                return Err(EngineError::AlreadyShutDown {
                    reporter: self.rule.name().to_string(),
                });
            }
            *shut_down = true;
        }

        let keys: Vec<R::Key> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        let queues: Vec<(R::Key, Vec<QueuedRecord>)> = keys
            .into_iter()
            .filter_map(|key| self.queues.remove(&key))
            .collect();

        queues
            .into_par_iter()
            .for_each(|(key, queue)| self.pair_queue(key, queue));

        let summary = self.counters.summary(self.rule.name());
        tracing::info!(
            reporter = self.rule.name(),
            matched = summary.matched,
            timed_out = summary.timed_out,
            flushed_incomplete = summary.flushed_incomplete,
            "Job pairing finished"
        );
        Ok(summary)
    }
}
