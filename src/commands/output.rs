use crate::cli::OutputFormat;
use crate::correlation::{CompletedEvent, CorrelationStatus, CorrelationSummary};
use crate::models::{FieldValue, StructuredRecord, TIMESTAMP_FIELD};
use crate::notifications::{Notification, NotificationSummary, Severity};
use crate::pipeline::RunSummary;
use crate::statistics::ParsingStatistics;
use colored::*;
use serde::Serialize;
use std::fmt::Display;
use std::io::{self, Write};

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_record(&self, record: &StructuredRecord) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(record),
            OutputFormat::Json | OutputFormat::Jsonl => to_json_line(record),
        }
    }

    pub fn format_records(&self, records: &[StructuredRecord]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
            _ => records
                .iter()
                .map(|r| self.format_record(r))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn print_header(&self, writer: &mut impl Write) -> io::Result<()> {
        if self.format == OutputFormat::Table {
            writeln!(writer, "{}", "─".repeat(100).dimmed())?;
        }
        Ok(())
    }

    fn format_table(&self, record: &StructuredRecord) -> String {
        let mut output = String::new();

        let ts = record
            .timestamp()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!("{} ", ts.cyan()));

        let location = match record.line_number() {
            Some(line) => format!("{}:{}", record.metadata.file_name, line),
            None => record.metadata.file_name.clone(),
        };
        output.push_str(&format!("{} ", location.dimmed()));

        if let Some(severity) = record.get_str("sev") {
            let colored_severity = match severity {
                "FATAL" => severity.red().bold(),
                "ERROR" => severity.red(),
                "WARN" | "WARNING" => severity.yellow(),
                "INFO" => severity.green(),
                "DEBUG" => severity.blue(),
                _ => severity.dimmed(),
            };
            output.push_str(&format!("[{:^5}] ", colored_severity));
        }

        if let Some(message) = record.get_str("message") {
            output.push_str(message);
        }

        let fields: Vec<String> = record
            .fields()
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), TIMESTAMP_FIELD | "sev" | "message"))
            .map(|(k, v)| format!("{}={}", k.dimmed(), format_value(v)))
            .collect();
        if !fields.is_empty() {
            output.push_str(&format!(" {}", fields.join(" ").dimmed()));
        }

        output
    }

    pub fn format_event<K: Display + Serialize>(&self, event: &CompletedEvent<K>) -> String {
        match self.format {
            OutputFormat::Table => {
                let status = match event.status {
                    CorrelationStatus::Matched => "matched".green(),
                    CorrelationStatus::TimedOut => "timed_out".yellow(),
                    CorrelationStatus::FlushedIncomplete => "incomplete".red(),
                };
                let duration = event
                    .duration_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_else(|| "-".to_string());
                let begin = event
                    .begin
                    .timestamp()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("{} {:>10} {:>10} {}", begin.cyan(), status, duration, event.key)
            }
            OutputFormat::Json | OutputFormat::Jsonl => to_json_line(event),
        }
    }
}

fn to_json_line<T: Serialize + ?Sized>(item: &T) -> String {
    serde_json::to_string(item).unwrap_or_default()
}

fn format_value(v: &FieldValue) -> String {
    match v {
        FieldValue::Map(_) | FieldValue::List(_) => serde_json::to_string(v).unwrap_or_default(),
        _ => v.to_string(),
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 / total as f64) * 100.0
    }
}

pub fn print_stats_summary(stats: &ParsingStatistics) {
    let total = stats.lines_read;
    println!("\n{}", "═".repeat(50).cyan());
    println!("{}", "SUMMARY".cyan().bold());
    println!("{}", "═".repeat(50).cyan());
    println!("Lines read:         {}", total.to_string().white().bold());
    println!("Records emitted:    {}", stats.records_emitted.to_string().green());
    println!(
        "Continuation lines: {} ({:.1}%)",
        stats.continuation_lines.to_string().cyan(),
        percentage(stats.continuation_lines, total)
    );
    println!(
        "Dropped lines:      {} ({:.1}%)",
        stats.dropped_lines.to_string().yellow(),
        percentage(stats.dropped_lines, total)
    );
    println!(
        "Malformed lines:    {} ({:.1}%)",
        stats.malformed_lines.to_string().red(),
        percentage(stats.malformed_lines, total)
    );
    println!("Bad timestamps:     {}", stats.timestamp_failures.to_string().yellow());

    if !stats.format_distribution.is_empty() {
        println!("\n{}:", "Format Distribution".dimmed());
        let mut formats: Vec<_> = stats.format_distribution.iter().collect();
        formats.sort_by_key(|(format_type, _)| format_type.as_str());
        for (format_type, count) in formats {
            println!(
                "  {}: {} ({:.1}%)",
                format_type.as_str().white(),
                count,
                percentage(*count, stats.records_emitted)
            );
        }
    }
}

pub fn print_notification_summary(summary: &NotificationSummary) {
    println!("\n{}:", "Notifications".cyan().bold());
    println!(
        "  errors: {}  warnings: {}",
        summary.errors.to_string().red(),
        summary.warnings.to_string().yellow()
    );
    for (reporter, counts) in &summary.by_reporter {
        println!("  {:24} {:>6} errors {:>6} warnings", reporter, counts.errors, counts.warnings);
    }
}

pub fn print_notifications(notifications: &[Notification], top: usize) {
    for notification in notifications.iter().take(top) {
        let severity = match notification.severity {
            Severity::Error => "error".red(),
            Severity::Warning => "warn".yellow(),
        };
        let location = match notification.line_number {
            Some(line) => format!("{}:{}", notification.file_path, line),
            None => notification.file_path.clone(),
        };
        println!("  [{}] {} {} {}", severity, notification.reporter, location.dimmed(), notification.message);
    }
}

pub fn print_correlation_summary(summaries: &[CorrelationSummary]) {
    for summary in summaries {
        eprintln!(
            "{}: {} matched, {} timed out, {} incomplete, {} missing key, {} unmatched ends",
            summary.reporter.cyan(),
            summary.matched.to_string().green(),
            summary.timed_out.to_string().yellow(),
            summary.flushed_incomplete.to_string().red(),
            summary.missing_key,
            summary.unmatched_ends
        );
    }
}

pub fn print_run_footer(summary: &RunSummary) {
    eprintln!(
        "{} {} files, {} records, {} errors, {} warnings in {}ms{}",
        "Done:".green().bold(),
        summary.files.len(),
        summary.totals.records_emitted,
        summary.notifications.errors,
        summary.notifications.warnings,
        summary.elapsed_millis,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
}
