use crate::models::StructuredRecord;
use crate::notifications::NotificationCollector;
use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Minute bucket a timestamp falls into
pub fn minute_bucket(at: NaiveDateTime) -> i64 {
    at.and_utc().timestamp().div_euclid(60)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationOutcome {
    /// Buckets that took the new value
    pub stored: usize,
    /// Buckets that already held a different value
    pub conflicts: usize,
}

/// "Which value was current at this minute", with one minute of tolerance.
///
/// A value is stored at its own minute and at the minutes either side,
/// because a transition near a boundary may be stamped into either
/// neighbour. The first value written to a bucket stays; a later
/// registration that disagrees with any bucket produces one warning.
pub struct TimeWindowedValueTracker<K, V> {
    name: String,
    buckets: DashMap<(K, i64), V>,
    notifications: Arc<dyn NotificationCollector>,
    conflicting_registrations: AtomicUsize,
}

/// Build version per worker
pub type BuildVersionTracker = TimeWindowedValueTracker<String, String>;

impl<K, V> TimeWindowedValueTracker<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync,
    V: Clone + PartialEq + fmt::Display + Send + Sync,
{
    pub fn new(name: impl Into<String>, notifications: Arc<dyn NotificationCollector>) -> Self {
        Self {
            name: name.into(),
            buckets: DashMap::new(),
            notifications,
            conflicting_registrations: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, key: K, at: NaiveDateTime, value: V) -> RegistrationOutcome {
        self.register_at(key, at, value, "", None)
    }

    /// Register using the record's timestamp; `None` if it has none
    pub fn register_record(&self, key: K, value: V, record: &StructuredRecord) -> Option<RegistrationOutcome> {
        let at = record.timestamp()?;
        Some(self.register_at(key, at, value, &record.metadata.file_path, record.line_number()))
    }

    fn register_at(
        &self,
        key: K,
        at: NaiveDateTime,
        value: V,
        file_path: &str,
        line_number: Option<u64>,
    ) -> RegistrationOutcome {
        let bucket = minute_bucket(at);
        let mut outcome = RegistrationOutcome::default();
        let mut existing_value = None;

        for offset in [-1, 0, 1] {
            match self.buckets.entry((key.clone(), bucket + offset)) {
                Entry::Occupied(entry) => {
                    if *entry.get() != value {
                        outcome.conflicts += 1;
                        existing_value.get_or_insert_with(|| entry.get().clone());
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(value.clone());
                    outcome.stored += 1;
                }
            }
        }

        if let Some(existing) = existing_value {
            self.conflicting_registrations.fetch_add(1, Ordering::Relaxed);
            self.notifications.report_warning(
                &format!(
                    "Conflicting value '{}' for {:?} at {}; keeping '{}'",
                    value, key, at, existing
                ),
                file_path,
                line_number,
                &self.name,
            );
        }

        outcome
    }

    pub fn resolve(&self, key: &K, at: NaiveDateTime) -> Option<V> {
        self.buckets
            .get(&(key.clone(), minute_bucket(at)))
            .map(|value| value.clone())
    }

    /// Registrations that conflicted with an earlier value
    pub fn conflicts(&self) -> usize {
        self.conflicting_registrations.load(Ordering::Relaxed)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::test_support::record;
    use crate::notifications::ProcessingNotifications;
    use quickcheck_macros::quickcheck;

    fn at(ts: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn tracker() -> (BuildVersionTracker, Arc<ProcessingNotifications>) {
        let notifications = Arc::new(ProcessingNotifications::new());
        (BuildVersionTracker::new("BuildVersion", notifications.clone()), notifications)
    }

    #[test]
    fn test_value_resolves_at_neighbouring_minutes() {
        let (tracker, notifications) = tracker();
        let worker = "worker0".to_string();
        let outcome = tracker.register(worker.clone(), at("2020-09-28 12:00:30"), "B1".to_string());
        assert_eq!(outcome, RegistrationOutcome { stored: 3, conflicts: 0 });

        for minute in ["2020-09-28 11:59:00", "2020-09-28 12:00:59", "2020-09-28 12:01:15"] {
            assert_eq!(tracker.resolve(&worker, at(minute)), Some("B1".to_string()));
        }
        assert_eq!(tracker.resolve(&worker, at("2020-09-28 12:02:00")), None);
        assert_eq!(tracker.resolve(&worker, at("2020-09-28 11:58:59")), None);
        assert_eq!(notifications.summary().warnings, 0);
    }

    #[test]
    fn test_conflict_warns_once_and_first_writer_wins() {
        let (tracker, notifications) = tracker();
        let worker = "worker0".to_string();
        tracker.register(worker.clone(), at("2020-09-28 12:00:30"), "B1".to_string());
        let outcome = tracker.register(worker.clone(), at("2020-09-28 12:00:45"), "B2".to_string());

        assert_eq!(outcome.conflicts, 3);
        assert_eq!(tracker.conflicts(), 1);
        assert_eq!(notifications.warnings_for("BuildVersion"), 1);
        assert_eq!(tracker.resolve(&worker, at("2020-09-28 12:00:00")), Some("B1".to_string()));
    }

    #[test]
    fn test_partial_overlap_fills_new_buckets() {
        let (tracker, notifications) = tracker();
        let worker = "worker1".to_string();
        tracker.register(worker.clone(), at("2020-09-28 12:00:00"), "B1".to_string());
        let outcome = tracker.register(worker.clone(), at("2020-09-28 12:02:00"), "B2".to_string());

        // 12:01 belongs to B1 already; 12:02 and 12:03 take B2
        assert_eq!(outcome, RegistrationOutcome { stored: 2, conflicts: 1 });
        assert_eq!(tracker.resolve(&worker, at("2020-09-28 12:01:00")), Some("B1".to_string()));
        assert_eq!(tracker.resolve(&worker, at("2020-09-28 12:02:00")), Some("B2".to_string()));
        assert_eq!(notifications.summary().warnings, 1);
    }

    #[test]
    fn test_same_value_is_not_a_conflict() {
        let (tracker, notifications) = tracker();
        let worker = "worker0".to_string();
        tracker.register(worker.clone(), at("2020-09-28 12:00:00"), "B1".to_string());
        tracker.register(worker.clone(), at("2020-09-28 12:00:40"), "B1".to_string());
        assert_eq!(tracker.conflicts(), 0);
        assert_eq!(notifications.summary().warnings, 0);
        assert_eq!(tracker.bucket_count(), 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let (tracker, _) = tracker();
        tracker.register("worker0".to_string(), at("2020-09-28 12:00:00"), "B1".to_string());
        tracker.register("worker1".to_string(), at("2020-09-28 12:00:00"), "B2".to_string());
        assert_eq!(tracker.conflicts(), 0);
        assert_eq!(
            tracker.resolve(&"worker1".to_string(), at("2020-09-28 12:00:00")),
            Some("B2".to_string())
        );
    }

    #[test]
    fn test_register_record_carries_location() {
        let (tracker, notifications) = tracker();
        let first = record(3, "2020-09-28 12:00:00", &[]);
        let second = record(8, "2020-09-28 12:00:10", &[]);
        tracker.register_record("worker0".to_string(), "B1".to_string(), &first).unwrap();
        tracker.register_record("worker0".to_string(), "B2".to_string(), &second).unwrap();

        let warning = &notifications.notifications()[0];
        assert_eq!(warning.line_number, Some(8));
        assert_eq!(warning.file_path, "worker0/backgrounder/backgrounder-1.log");
    }

    #[quickcheck]
    fn prop_registered_value_resolves_at_its_own_minute(seconds: u32, value: String) -> bool {
        let (tracker, _) = tracker();
        let ts = at("2020-01-01 00:00:00") + chrono::TimeDelta::seconds(i64::from(seconds % 1_000_000));
        tracker.register(0u8.to_string(), ts, value.clone());
        tracker.resolve(&0u8.to_string(), ts) == Some(value)
    }
}
