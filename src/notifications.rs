use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Receiver of soft failures (errors and warnings) raised while processing.
///
/// The core calls this for every data-quality issue and keeps going.
pub trait NotificationCollector: Send + Sync {
    fn report_error(&self, message: &str, file_path: &str, line_number: Option<u64>, reporter: &str);
    fn report_warning(&self, message: &str, file_path: &str, line_number: Option<u64>, reporter: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub file_path: String,
    pub line_number: Option<u64>,
    pub reporter: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReporterCounts {
    pub errors: usize,
    pub warnings: usize,
}

/// Aggregate notification counts for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationSummary {
    pub errors: usize,
    pub warnings: usize,
    pub by_reporter: BTreeMap<String, ReporterCounts>,
}

#[derive(Debug, Default)]
struct CollectorState {
    stored: Vec<Notification>,
    summary: NotificationSummary,
}

/// In-memory collector that counts everything and keeps the first
/// `max_stored` notifications for display.
#[derive(Debug)]
pub struct ProcessingNotifications {
    state: Mutex<CollectorState>,
    max_stored: usize,
}

impl ProcessingNotifications {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_stored: usize) -> Self {
        Self {
            state: Mutex::new(CollectorState::default()),
            max_stored,
        }
    }

    pub fn summary(&self) -> NotificationSummary {
        self.state.lock().summary.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().stored.clone()
    }

    pub fn warnings_for(&self, reporter: &str) -> usize {
        self.state
            .lock()
            .summary
            .by_reporter
            .get(reporter)
            .map(|c| c.warnings)
            .unwrap_or(0)
    }

    pub fn errors_for(&self, reporter: &str) -> usize {
        self.state
            .lock()
            .summary
            .by_reporter
            .get(reporter)
            .map(|c| c.errors)
            .unwrap_or(0)
    }

    fn record(&self, notification: Notification) {
        let mut state = self.state.lock();
        let counts = state
            .summary
            .by_reporter
            .entry(notification.reporter.clone())
            .or_default();
        match notification.severity {
            Severity::Error => counts.errors += 1,
            Severity::Warning => counts.warnings += 1,
        }
        match notification.severity {
            Severity::Error => state.summary.errors += 1,
            Severity::Warning => state.summary.warnings += 1,
        }
        if state.stored.len() < self.max_stored {
            state.stored.push(notification);
        }
    }
}

impl Default for ProcessingNotifications {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCollector for ProcessingNotifications {
    fn report_error(&self, message: &str, file_path: &str, line_number: Option<u64>, reporter: &str) {
        tracing::error!(file = file_path, line = line_number, reporter, "{}", message);
        self.record(Notification {
            severity: Severity::Error,
            message: message.to_string(),
            file_path: file_path.to_string(),
            line_number,
            reporter: reporter.to_string(),
        });
    }

    fn report_warning(&self, message: &str, file_path: &str, line_number: Option<u64>, reporter: &str) {
        tracing::warn!(file = file_path, line = line_number, reporter, "{}", message);
        self.record(Notification {
            severity: Severity::Warning,
            message: message.to_string(),
            file_path: file_path.to_string(),
            line_number,
            reporter: reporter.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counts_by_reporter() {
        let collector = ProcessingNotifications::new();
        collector.report_error("missing job_id", "a.log", Some(3), "JobLifecycle");
        collector.report_warning("conflicting build", "b.log", Some(9), "BuildTracker");
        collector.report_warning("conflicting build", "b.log", Some(10), "BuildTracker");

        let summary = collector.summary();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.warnings, 2);
        assert_eq!(collector.warnings_for("BuildTracker"), 2);
        assert_eq!(collector.errors_for("JobLifecycle"), 1);
        assert_eq!(collector.errors_for("Unknown"), 0);
    }

    #[test]
    fn test_storage_is_capped_but_counts_are_not() {
        let collector = ProcessingNotifications::with_capacity(2);
        for i in 0..5 {
            collector.report_warning("noise", "c.log", Some(i), "Test");
        }
        assert_eq!(collector.notifications().len(), 2);
        assert_eq!(collector.summary().warnings, 5);
    }

    #[test]
    fn test_concurrent_reporting() {
        let collector = Arc::new(ProcessingNotifications::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for i in 0..100 {
                        collector.report_warning("w", "f.log", Some(i), &format!("R{}", t));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let summary = collector.summary();
        assert_eq!(summary.warnings, 400);
        assert_eq!(summary.by_reporter.len(), 4);
    }
}
