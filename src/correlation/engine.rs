use crate::correlation::*;
use crate::error::EngineError;
use crate::models::StructuredRecord;
use crate::notifications::NotificationCollector;
use crate::sink::OutputSink;
use chrono::{NaiveDateTime, TimeDelta};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Streaming begin/end matcher.
///
/// Pending begins live in a sharded concurrent map, so independent keys
/// never contend on one lock and every per-key transition is a single
/// atomic map operation:
///
/// * begin: `insert`; a displaced begin is emitted as `TimedOut`
/// * end: `remove_if`; the removed begin is emitted as `Matched`
/// * shutdown: every remaining begin is emitted as `FlushedIncomplete`
///
/// With a pending timeout set, begins older than their own file's newest
/// observed timestamp minus the timeout are swept as `TimedOut` every
/// `sweep_interval` observations. Files are parsed concurrently, so one
/// file running ahead in time never expires another file's begins.
pub struct CorrelationEngine<R: CorrelationRule> {
    rule: R,
    pending: DashMap<R::Key, StructuredRecord>,
    sink: Arc<dyn OutputSink<CompletedEvent<R::Key>>>,
    notifications: Arc<dyn NotificationCollector>,
    counters: EventCounters,
    /// `true` once shut down. Observers hold the read side for the whole
    /// observation so shutdown never races an in-flight record.
    shut_down: RwLock<bool>,
    pending_timeout: Option<TimeDelta>,
    sweep_interval: usize,
    observed: AtomicUsize,
    /// Newest timestamp seen per file path
    watermarks: DashMap<String, NaiveDateTime>,
}

impl<R: CorrelationRule> CorrelationEngine<R> {
    pub fn new(
        rule: R,
        sink: Arc<dyn OutputSink<CompletedEvent<R::Key>>>,
        notifications: Arc<dyn NotificationCollector>,
    ) -> Self {
        Self {
            rule,
            pending: DashMap::new(),
            sink,
            notifications,
            counters: EventCounters::default(),
            shut_down: RwLock::new(false),
            pending_timeout: None,
            sweep_interval: 0,
            observed: AtomicUsize::new(0),
            watermarks: DashMap::new(),
        }
    }

    pub fn with_pending_timeout(mut self, timeout: TimeDelta, sweep_interval: usize) -> Self {
        self.pending_timeout = Some(timeout);
        self.sweep_interval = sweep_interval.max(1);
        self
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Newest timestamp observed so far in `file_path`
    pub fn watermark(&self, file_path: &str) -> Option<NaiveDateTime> {
        self.watermarks.get(file_path).map(|ts| *ts)
    }

    pub fn summary(&self) -> CorrelationSummary {
        self.counters.summary(self.rule.name())
    }

    fn emit(&self, event: CompletedEvent<R::Key>) {
        self.counters.record(event.status);
        self.sink.add_record(event);
    }

    fn advance_watermark(&self, record: &StructuredRecord) {
        if let Some(ts) = record.timestamp() {
            self.watermarks
                .entry(record.metadata.file_path.clone())
                .and_modify(|newest| *newest = (*newest).max(ts))
                .or_insert(ts);
        }
    }

    fn handle_begin(&self, key: R::Key, record: &StructuredRecord) {
        if let Some(displaced) = self.pending.insert(key.clone(), record.clone()) {
            tracing::debug!(
                reporter = self.rule.name(),
                "Begin for {:?} replaced an unresolved begin",
                key
            );
            self.emit(CompletedEvent::unmatched(key, displaced, CorrelationStatus::TimedOut));
        }
    }

    fn handle_end(&self, key: R::Key, record: &StructuredRecord) {
        let resolved = self
            .pending
            .remove_if(&key, |_, begin| self.rule.is_matching_end(begin, record));

        match resolved {
            Some((key, begin)) => self.emit(CompletedEvent::matched(key, begin, record.clone())),
            None => {
                self.counters.unmatched_end();
                self.notifications.report_warning(
                    &format!("End event for {:?} has no pending begin", key),
                    &record.metadata.file_path,
                    record.line_number(),
                    self.rule.name(),
                );
            }
        }
    }

    /// Emit every pending begin older than its file's watermark minus the
    /// timeout. A cutoff before the earliest representable time expires nothing.
    pub fn sweep_expired(&self) -> usize {
        let timeout = match self.pending_timeout {
            Some(timeout) => timeout,
            None => return 0,
        };
        let is_expired = |begin: &StructuredRecord| {
            let cutoff = self
                .watermark(&begin.metadata.file_path)
                .and_then(|watermark| watermark.checked_sub_signed(timeout));
            match (begin.timestamp(), cutoff) {
                (Some(ts), Some(cutoff)) => ts < cutoff,
                _ => false,
            }
        };

        let expired: Vec<R::Key> = self
            .pending
            .iter()
            .filter(|entry| is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = 0;
        for key in expired {
            if let Some((key, begin)) = self.pending.remove_if(&key, |_, begin| is_expired(begin)) {
                self.emit(CompletedEvent::unmatched(key, begin, CorrelationStatus::TimedOut));
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::debug!(reporter = self.rule.name(), "Swept {} stale begins", swept);
        }
        swept
    }
}

impl<R: CorrelationRule> EventCorrelator for CorrelationEngine<R> {
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

        self.advance_watermark(record);

        match self.rule.classify(record) {
            Classification::Begin(key) => self.handle_begin(key, record),
            Classification::End(key) => self.handle_end(key, record),
            Classification::MissingKey { field } => {
                self.counters.missing_key();
                report_missing_key(self.notifications.as_ref(), self.rule.name(), record, &field);
            }
            Classification::Unrelated => {}
        }

        if self.pending_timeout.is_some() {
            let observed = self.observed.fetch_add(1, Ordering::Relaxed) + 1;
            if observed % self.sweep_interval == 0 {
                self.sweep_expired();
            }
        }

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

        let keys: Vec<R::Key> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((key, begin)) = self.pending.remove(&key) {
                self.emit(CompletedEvent::unmatched(key, begin, CorrelationStatus::FlushedIncomplete));
            }
        }

        let summary = self.summary();
        tracing::info!(
            reporter = self.rule.name(),
            matched = summary.matched,
            timed_out = summary.timed_out,
            flushed_incomplete = summary.flushed_incomplete,
            "Correlation finished"
        );
        Ok(summary)
    }
}
