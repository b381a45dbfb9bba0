use crate::correlation::test_support::record;
use crate::correlation::*;
use crate::models::StructuredRecord;
use crate::notifications::ProcessingNotifications;
use crate::sink::{MemorySink, OutputSink};
use chrono::{NaiveDateTime, TimeDelta};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

type QueryEvents = Arc<MemorySink<CompletedEvent<RequestKey>>>;
type JobEvents = Arc<MemorySink<CompletedEvent<JobKey>>>;

fn query_rule() -> QueryEventRule {
    QueryEventRule::new("Queries", "begin-query", "end-query", "cmd")
}

fn query_engine() -> (CorrelationEngine<QueryEventRule>, QueryEvents, Arc<ProcessingNotifications>) {
    let sink: QueryEvents = Arc::new(MemorySink::new());
    let notifications = Arc::new(ProcessingNotifications::new());
    let engine = CorrelationEngine::new(query_rule(), sink.clone(), notifications.clone());
    (engine, sink, notifications)
}

fn timestamp(offset_seconds: i64) -> String {
    let base = NaiveDateTime::parse_from_str("2020-09-28 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    (base + TimeDelta::seconds(offset_seconds))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn query_event(line: u64, offset_seconds: i64, event: &str, request: &str) -> StructuredRecord {
    record(
        line,
        &timestamp(offset_seconds),
        &[("k", event), ("req", request), ("cmd", "tabsrv:query")],
    )
}

fn job_event(line: u64, offset_seconds: i64, begin: bool, job_type: &str, id: usize) -> StructuredRecord {
    let message = if begin {
        format!("Running job of type {}; no timeout; priority: 0; id: {}; args: null", job_type, id)
    } else {
        format!("Job finished: SUCCESS; name: {}; type :{}; id: {}; notes: null", job_type, job_type, id)
    };
    record(line, &timestamp(offset_seconds), &[("message", message.as_str())])
}

#[test]
fn test_begin_end_five_seconds_apart() {
    let (engine, sink, _) = query_engine();
    engine.observe(&query_event(1, 0, "begin-query", "R1")).unwrap();
    engine.observe(&query_event(2, 5, "end-query", "R1")).unwrap();
    engine.observe(&query_event(3, 6, "begin-query", "R2")).unwrap();

    let summary = engine.shutdown().unwrap();
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.flushed_incomplete, 1);

    let events = sink.items();
    let matched = events
        .iter()
        .find(|e| e.status == CorrelationStatus::Matched)
        .unwrap();
    assert_eq!(matched.key, RequestKey::new("R1", "tabsrv:query"));
    assert_eq!(matched.duration(), Some(TimeDelta::seconds(5)));

    let incomplete = events
        .iter()
        .find(|e| e.status == CorrelationStatus::FlushedIncomplete)
        .unwrap();
    assert_eq!(incomplete.key.request_id, "R2");
    assert!(incomplete.end.is_none());
}

#[test]
fn test_concurrent_producers_yield_one_event_per_key() {
    const THREADS: usize = 8;
    const KEYS_PER_THREAD: usize = 250;

    let (engine, sink, notifications) = query_engine();
    thread::scope(|scope| {
        for t in 0..THREADS {
            let engine = &engine;
            scope.spawn(move || {
                for k in 0..KEYS_PER_THREAD {
                    let request = format!("T{}-R{}", t, k);
                    let line = (k * 2) as u64;
                    engine.observe(&query_event(line, 0, "begin-query", &request)).unwrap();
                    engine.observe(&query_event(line + 1, 3, "end-query", &request)).unwrap();
                }
            });
        }
    });

    let summary = engine.shutdown().unwrap();
    assert_eq!(summary.matched, THREADS * KEYS_PER_THREAD);
    assert_eq!(summary.events(), THREADS * KEYS_PER_THREAD);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(notifications.summary().warnings, 0);

    let keys: HashSet<_> = sink.items().into_iter().map(|e| e.key).collect();
    assert_eq!(keys.len(), THREADS * KEYS_PER_THREAD);
}

#[test]
fn test_concurrent_job_records_pair_after_shutdown() {
    const THREADS: usize = 4;
    const JOBS: usize = 50;

    let sink: JobEvents = Arc::new(MemorySink::new());
    let correlator = JobLifecycleCorrelator::new(
        BackgrounderJobRule::new(),
        sink.clone(),
        Arc::new(ProcessingNotifications::new()),
    );

    // Ends and begins of the same job arrive from different threads in any order
    thread::scope(|scope| {
        for t in 0..THREADS {
            let correlator = &correlator;
            scope.spawn(move || {
                for job in (t..JOBS).step_by(THREADS) {
                    let offset = (job * 10) as i64;
                    let line = (job * 2) as u64;
                    correlator.observe(&job_event(line + 1, offset + 4, false, "RefreshExtracts", job)).unwrap();
                    correlator.observe(&job_event(line, offset, true, "RefreshExtracts", job)).unwrap();
                }
            });
        }
    });

    let summary = correlator.shutdown().unwrap();
    assert_eq!(summary.matched, JOBS);
    assert_eq!(summary.unmatched_ends, 0);
    assert!(sink.items().iter().all(|e| e.duration_ms == Some(4000)));
}

#[test]
fn test_correlators_share_one_notification_collector() {
    let notifications = Arc::new(ProcessingNotifications::new());
    let query_sink: QueryEvents = Arc::new(MemorySink::new());
    let job_sink: JobEvents = Arc::new(MemorySink::new());
    let correlators: Vec<Arc<dyn EventCorrelator>> = vec![
        Arc::new(CorrelationEngine::new(query_rule(), query_sink.clone(), notifications.clone())),
        Arc::new(JobLifecycleCorrelator::new(
            BackgrounderJobRule::new(),
            job_sink.clone(),
            notifications.clone(),
        )),
    ];

    let no_request = record(1, &timestamp(0), &[("k", "begin-query"), ("cmd", "select")]);
    let stray_end = query_event(2, 1, "end-query", "R9");
    for correlator in &correlators {
        correlator.observe(&no_request).unwrap();
        correlator.observe(&stray_end).unwrap();
    }

    let summaries: Vec<_> = correlators.iter().map(|c| c.shutdown().unwrap()).collect();
    assert_eq!(summaries[0].missing_key, 1);
    assert_eq!(summaries[0].unmatched_ends, 1);
    assert_eq!(notifications.errors_for("Queries"), 1);
    assert_eq!(notifications.warnings_for("Queries"), 1);
    assert_eq!(summaries[1].events(), 0);
    assert_eq!(query_sink.close().persisted, 0);
    assert_eq!(job_sink.close().persisted, 0);
}

#[test]
fn test_build_version_tracker_across_threads() {
    let notifications = Arc::new(ProcessingNotifications::new());
    let tracker = BuildVersionTracker::new("BuildVersion", notifications.clone());
    let at = NaiveDateTime::parse_from_str("2020-09-28 12:00:30", "%Y-%m-%d %H:%M:%S").unwrap();

    thread::scope(|scope| {
        for version in ["B1", "B2"] {
            let tracker = &tracker;
            scope.spawn(move || {
                tracker.register("worker0".to_string(), at, version.to_string());
            });
        }
    });

    // Each bucket keeps its first writer; every losing registration warns once
    for offset in [-60, 0, 60] {
        let resolved = tracker.resolve(&"worker0".to_string(), at + TimeDelta::seconds(offset));
        assert!(matches!(resolved.as_deref(), Some("B1") | Some("B2")));
    }
    assert_eq!(tracker.bucket_count(), 3);
    assert!((1..=2).contains(&tracker.conflicts()));
    assert_eq!(notifications.summary().warnings, tracker.conflicts());
}

/// Every begin produces exactly one event however the begins and ends interleave
#[quickcheck]
fn prop_job_pairing_emits_one_event_per_begin(steps: Vec<bool>) -> bool {
    let sink: JobEvents = Arc::new(MemorySink::new());
    let correlator = JobLifecycleCorrelator::new(
        BackgrounderJobRule::new(),
        sink.clone(),
        Arc::new(ProcessingNotifications::new()),
    );

    let mut job = 0;
    for (i, is_begin) in steps.iter().enumerate() {
        if *is_begin {
            job += 1;
        }
        correlator
            .observe(&job_event(i as u64, i as i64, *is_begin, "X", job))
            .unwrap();
    }

    let begins = steps.iter().filter(|b| **b).count();
    let summary = correlator.shutdown().unwrap();
    summary.events() == begins && sink.len() == begins
}

#[quickcheck]
fn prop_streaming_engine_drains_on_shutdown(requests: Vec<(u8, bool)>) -> bool {
    let (engine, sink, _) = query_engine();
    for (i, (request, is_begin)) in requests.iter().enumerate() {
        let event = if *is_begin { "begin-query" } else { "end-query" };
        engine
            .observe(&query_event(i as u64, i as i64, event, &request.to_string()))
            .unwrap();
    }

    let begins = requests.iter().filter(|(_, b)| *b).count();
    let summary = engine.shutdown().unwrap();
    engine.pending_len() == 0 && summary.events() == begins && sink.len() == begins
}
