use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::models::FormatType;

/// Per-stream parsing statistics.
///
/// Every physical unit read lands in exactly one bucket, so
/// `lines_read == record_lines + continuation_lines + dropped_lines + malformed_lines`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsingStatistics {
    /// Physical lines (or CSV rows) read from the stream
    pub lines_read: usize,
    /// Records handed to the caller
    pub records_emitted: usize,
    /// First lines of emitted records
    pub record_lines: usize,
    /// Extra lines absorbed into multi-line records
    pub continuation_lines: usize,
    /// Lines that matched no candidate pattern
    pub dropped_lines: usize,
    /// Lines of recognized-format units that failed to decode
    pub malformed_lines: usize,
    /// Records kept with a sentinel timestamp
    pub timestamp_failures: usize,
    /// Records per parser family
    pub format_distribution: HashMap<FormatType, usize>,
    /// Processing time statistics (in microseconds)
    pub processing_time_micros: ProcessingTimeStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingTimeStats {
    pub total_time: u64,
    pub min_time: u64,
    pub max_time: u64,
    pub avg_time: f64,
}

impl ParsingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an emitted record spanning `physical_lines` lines
    pub fn record_emitted(&mut self, format_type: FormatType, physical_lines: usize, processing_time_micros: u64) {
        let physical_lines = physical_lines.max(1);
        self.lines_read += physical_lines;
        self.records_emitted += 1;
        self.record_lines += 1;
        self.continuation_lines += physical_lines - 1;
        *self.format_distribution.entry(format_type).or_insert(0) += 1;
        self.update_processing_time(processing_time_micros);
    }

    /// Record a unit that matched no pattern
    pub fn record_dropped(&mut self, physical_lines: usize) {
        self.lines_read += physical_lines;
        self.dropped_lines += physical_lines;
    }

    /// Record a unit in a recognized format that failed to decode
    pub fn record_malformed(&mut self, physical_lines: usize) {
        self.lines_read += physical_lines;
        self.malformed_lines += physical_lines;
    }

    pub fn record_timestamp_failure(&mut self) {
        self.timestamp_failures += 1;
    }

    /// True when every line read is accounted for in exactly one bucket
    pub fn is_balanced(&self) -> bool {
        self.lines_read
            == self.record_lines + self.continuation_lines + self.dropped_lines + self.malformed_lines
    }

    /// Fold another stream's statistics into this one
    pub fn merge(&mut self, other: &ParsingStatistics) {
        self.lines_read += other.lines_read;
        self.records_emitted += other.records_emitted;
        self.record_lines += other.record_lines;
        self.continuation_lines += other.continuation_lines;
        self.dropped_lines += other.dropped_lines;
        self.malformed_lines += other.malformed_lines;
        self.timestamp_failures += other.timestamp_failures;
        for (format_type, count) in &other.format_distribution {
            *self.format_distribution.entry(*format_type).or_insert(0) += count;
        }

        let time = &other.processing_time_micros;
        self.processing_time_micros.total_time =
            self.processing_time_micros.total_time.saturating_add(time.total_time);
        if time.min_time > 0
            && (self.processing_time_micros.min_time == 0 || time.min_time < self.processing_time_micros.min_time)
        {
            self.processing_time_micros.min_time = time.min_time;
        }
        if time.max_time > self.processing_time_micros.max_time {
            self.processing_time_micros.max_time = time.max_time;
        }
        self.refresh_average();
    }

    /// Share of read lines that ended up in emitted records, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.lines_read == 0 {
            0.0
        } else {
            ((self.record_lines + self.continuation_lines) as f64 / self.lines_read as f64) * 100.0
        }
    }

    /// Share of read lines that were dropped or malformed, as a percentage
    pub fn drop_rate(&self) -> f64 {
        if self.lines_read == 0 {
            0.0
        } else {
            ((self.dropped_lines + self.malformed_lines) as f64 / self.lines_read as f64) * 100.0
        }
    }

    fn update_processing_time(&mut self, time_micros: u64) {
        self.processing_time_micros.total_time = self.processing_time_micros.total_time.saturating_add(time_micros);

        if self.processing_time_micros.min_time == 0 || time_micros < self.processing_time_micros.min_time {
            self.processing_time_micros.min_time = time_micros;
        }

        if time_micros > self.processing_time_micros.max_time {
            self.processing_time_micros.max_time = time_micros;
        }

        self.refresh_average();
    }

    fn refresh_average(&mut self) {
        self.processing_time_micros.avg_time = if self.records_emitted == 0 {
            0.0
        } else {
            self.processing_time_micros.total_time as f64 / self.records_emitted as f64
        };
    }
}

/// Wraps statistics with periodic status reporting through `tracing`
#[derive(Debug, Clone)]
pub struct StatisticsMonitor {
    stats: ParsingStatistics,
    source: String,
    report_interval: usize,
    last_report_line: usize,
}

impl StatisticsMonitor {
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_interval(source, 0)
    }

    /// `report_interval` of 0 disables periodic reporting
    pub fn with_interval(source: impl Into<String>, report_interval: usize) -> Self {
        Self {
            stats: ParsingStatistics::new(),
            source: source.into(),
            report_interval,
            last_report_line: 0,
        }
    }

    pub fn record_emitted(&mut self, format_type: FormatType, physical_lines: usize, processing_time_micros: u64) {
        self.stats.record_emitted(format_type, physical_lines, processing_time_micros);
        self.check_and_report();
    }

    pub fn record_dropped(&mut self, physical_lines: usize) {
        self.stats.record_dropped(physical_lines);
        self.check_and_report();
    }

    pub fn record_malformed(&mut self, physical_lines: usize) {
        self.stats.record_malformed(physical_lines);
        self.check_and_report();
    }

    pub fn record_timestamp_failure(&mut self) {
        self.stats.record_timestamp_failure();
    }

    pub fn get_statistics(&self) -> &ParsingStatistics {
        &self.stats
    }

    pub fn into_statistics(self) -> ParsingStatistics {
        self.stats
    }

    /// Generate a compact status line for continuous monitoring
    pub fn generate_status_line(&self) -> String {
        let stats = &self.stats;
        format!(
            "Lines: {} | Records: {} | Dropped: {:.1}% | Continuation: {} | Avg Time: {:.1}μs",
            stats.lines_read,
            stats.records_emitted,
            stats.drop_rate(),
            stats.continuation_lines,
            stats.processing_time_micros.avg_time
        )
    }

    fn check_and_report(&mut self) {
        if self.report_interval == 0 {
            return;
        }

        let lines_since_last_report = self.stats.lines_read - self.last_report_line;

        if lines_since_last_report >= self.report_interval {
            tracing::info!(file = %self.source, "{}", self.generate_status_line());
            self.last_report_line = self.stats.lines_read;
        }
    }
}

/// Generate a multi-line report for a set of statistics
pub fn generate_report(stats: &ParsingStatistics) -> String {
    let mut report = String::new();

    report.push_str("=== Parsing Statistics Report ===\n");
    report.push_str(&format!("Lines read: {}\n", stats.lines_read));
    report.push_str(&format!("Records emitted: {}\n", stats.records_emitted));
    report.push_str(&format!("Continuation lines: {}\n", stats.continuation_lines));
    report.push_str(&format!("Dropped lines: {}\n", stats.dropped_lines));
    report.push_str(&format!("Malformed lines: {}\n", stats.malformed_lines));
    report.push_str(&format!("Timestamp failures: {}\n", stats.timestamp_failures));

    report.push_str("\n--- Format Distribution ---\n");
    let mut formats: Vec<_> = stats.format_distribution.iter().collect();
    formats.sort_by_key(|(format_type, _)| format_type.as_str());
    for (format_type, count) in formats {
        let percentage = if stats.records_emitted == 0 {
            0.0
        } else {
            (*count as f64 / stats.records_emitted as f64) * 100.0
        };
        report.push_str(&format!("{}: {} ({:.2}%)\n", format_type.as_str(), count, percentage));
    }

    report.push_str("\n--- Performance Metrics ---\n");
    report.push_str(&format!("Total processing time: {}μs\n", stats.processing_time_micros.total_time));
    report.push_str(&format!("Average processing time: {:.2}μs\n", stats.processing_time_micros.avg_time));

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting_is_balanced() {
        let mut stats = ParsingStatistics::new();
        stats.record_emitted(FormatType::MultilineRegex, 3, 10);
        stats.record_emitted(FormatType::MultilineRegex, 1, 20);
        stats.record_dropped(2);
        stats.record_malformed(1);

        assert_eq!(stats.lines_read, 7);
        assert_eq!(stats.records_emitted, 2);
        assert_eq!(stats.continuation_lines, 2);
        assert!(stats.is_balanced());
        assert_eq!(stats.processing_time_micros.min_time, 10);
        assert_eq!(stats.processing_time_micros.max_time, 20);
        assert_eq!(stats.processing_time_micros.avg_time, 15.0);
    }

    #[test]
    fn test_merge() {
        let mut a = ParsingStatistics::new();
        a.record_emitted(FormatType::Regex, 1, 5);
        a.record_dropped(1);

        let mut b = ParsingStatistics::new();
        b.record_emitted(FormatType::JsonLines, 1, 7);
        b.record_timestamp_failure();

        a.merge(&b);
        assert_eq!(a.lines_read, 3);
        assert_eq!(a.records_emitted, 2);
        assert_eq!(a.timestamp_failures, 1);
        assert_eq!(a.format_distribution.get(&FormatType::JsonLines), Some(&1));
        assert_eq!(a.processing_time_micros.max_time, 7);
        assert!(a.is_balanced());
    }

    #[test]
    fn test_rates_on_empty_stats() {
        let stats = ParsingStatistics::new();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.drop_rate(), 0.0);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_report_mentions_counts() {
        let mut monitor = StatisticsMonitor::with_interval("a.log", 1);
        monitor.record_emitted(FormatType::Csv, 1, 3);
        let report = generate_report(monitor.get_statistics());
        assert!(report.contains("Records emitted: 1"));
        assert!(report.contains("csv: 1"));
        assert!(monitor.generate_status_line().starts_with("Lines: 1"));
    }
}
