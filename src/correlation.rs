//! Begin/end correlation of records into completed domain events.
//!
//! Two pairing policies share the same rules and event type: the streaming
//! [`CorrelationEngine`] resolves pairs as records arrive, and the
//! [`JobLifecycleCorrelator`] buffers each key's records and pairs them as
//! an ordered queue once input ends. [`TimeWindowedValueTracker`] covers
//! "which value was current at this minute" lookups.

use crate::error::EngineError;
use crate::models::*;
use crate::notifications::NotificationCollector;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod engine;
pub mod job_lifecycle;
pub mod key;
pub mod rules;
pub mod time_window;

pub use engine::CorrelationEngine;
pub use job_lifecycle::JobLifecycleCorrelator;
pub use key::{CorrelationKey, JobKey, RequestKey};
pub use rules::{BackgrounderJobRule, QueryEventRule};
pub use time_window::{minute_bucket, BuildVersionTracker, RegistrationOutcome, TimeWindowedValueTracker};

/// Role a record plays for one correlation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<K> {
    Begin(K),
    End(K),
    /// Not part of this rule's lifecycle
    Unrelated,
    /// Looks like a begin or end but the named identifying field is absent
    MissingKey { field: String },
}

/// Decides which records open and close a unit of work
pub trait CorrelationRule: Send + Sync {
    type Key: CorrelationKey;

    /// Reporter name used for notifications and summaries
    fn name(&self) -> &str;

    fn classify(&self, record: &StructuredRecord) -> Classification<Self::Key>;

    /// Whether `end` closes `begin`. Only called for records with equal keys.
    fn is_matching_end(&self, _begin: &StructuredRecord, _end: &StructuredRecord) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Matched,
    /// A newer begin or a non-matching record arrived before the end
    TimedOut,
    /// Input ended with the begin still open
    FlushedIncomplete,
}

/// A begin record, possibly merged with its end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedEvent<K> {
    pub key: K,
    pub status: CorrelationStatus,
    pub begin: StructuredRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<StructuredRecord>,
    /// end.ts - begin.ts in milliseconds, when both are known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl<K> CompletedEvent<K> {
    pub fn matched(key: K, begin: StructuredRecord, end: StructuredRecord) -> Self {
        let duration_ms = match (begin.timestamp(), end.timestamp()) {
            (Some(start), Some(finish)) => Some((finish - start).num_milliseconds()),
            _ => None,
        };
        Self {
            key,
            status: CorrelationStatus::Matched,
            begin,
            end: Some(end),
            duration_ms,
        }
    }

    pub fn unmatched(key: K, begin: StructuredRecord, status: CorrelationStatus) -> Self {
        Self {
            key,
            status,
            begin,
            end: None,
            duration_ms: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::TimeDelta> {
        self.duration_ms.map(chrono::TimeDelta::milliseconds)
    }

    /// Begin fields overlaid with end fields; end values that differ are kept
    /// under an `end_` prefix
    pub fn merged_fields(&self) -> Fields {
        let mut merged = self.begin.fields().clone();
        if let Some(end) = &self.end {
            for (name, value) in end.fields() {
                match merged.get(name) {
                    None => {
                        merged.insert(name.clone(), value.clone());
                    }
                    Some(existing) if existing == value => {}
                    Some(_) => {
                        merged.insert(format!("end_{}", name), value.clone());
                    }
                }
            }
        }
        merged
    }
}

/// Final counts for one correlator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationSummary {
    pub reporter: String,
    pub matched: usize,
    pub timed_out: usize,
    pub flushed_incomplete: usize,
    /// Records excluded for lacking an identifying field
    pub missing_key: usize,
    /// Ends with no begin to close
    pub unmatched_ends: usize,
}

impl CorrelationSummary {
    pub fn events(&self) -> usize {
        self.matched + self.timed_out + self.flushed_incomplete
    }
}

/// Object-safe face of a correlator so a run can drive several at once
pub trait EventCorrelator: Send + Sync {
    fn reporter(&self) -> &str;

    /// Feed one record. Fails only after `shutdown`.
    fn observe(&self, record: &StructuredRecord) -> Result<(), EngineError>;

    /// Resolve all pending state and emit it. Fails if called twice.
    fn shutdown(&self) -> Result<CorrelationSummary, EngineError>;
}

#[derive(Debug, Default)]
pub(crate) struct EventCounters {
    matched: AtomicUsize,
    timed_out: AtomicUsize,
    flushed_incomplete: AtomicUsize,
    missing_key: AtomicUsize,
    unmatched_ends: AtomicUsize,
}

impl EventCounters {
    pub(crate) fn record(&self, status: CorrelationStatus) {
        let counter = match status {
            CorrelationStatus::Matched => &self.matched,
            CorrelationStatus::TimedOut => &self.timed_out,
            CorrelationStatus::FlushedIncomplete => &self.flushed_incomplete,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn missing_key(&self) {
        self.missing_key.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unmatched_end(&self) {
        self.unmatched_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn summary(&self, reporter: &str) -> CorrelationSummary {
        CorrelationSummary {
            reporter: reporter.to_string(),
            matched: self.matched.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            flushed_incomplete: self.flushed_incomplete.load(Ordering::Relaxed),
            missing_key: self.missing_key.load(Ordering::Relaxed),
            unmatched_ends: self.unmatched_ends.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn report_missing_key(
    notifications: &dyn NotificationCollector,
    reporter: &str,
    record: &StructuredRecord,
    field: &str,
) {
    notifications.report_error(
        &format!("Record is missing correlation field '{}'", field),
        &record.metadata.file_path,
        record.line_number(),
        reporter,
    );
}
