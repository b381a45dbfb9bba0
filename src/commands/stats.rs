use crate::cli::StatsArgs;
use crate::commands::output::{print_notification_summary, print_notifications, print_run_footer, print_stats_summary};
use crate::commands::parse::{load_registry, resolve_inputs};
use crate::config::RunConfig;
use crate::models::StructuredRecord;
use crate::pipeline::IngestPipeline;
use crate::sink::MemorySink;
use crate::statistics::generate_report;
use colored::*;

pub fn run_stats(args: StatsArgs, parallel: usize) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(args.input.dialect_file.as_deref())?;
    let inputs = resolve_inputs(&args.input, &registry)?;

    if inputs.is_empty() {
        eprintln!("No files matched the given patterns");
        return Ok(());
    }

    let config = RunConfig {
        num_threads: parallel,
        ..RunConfig::default()
    };
    let pipeline = IngestPipeline::new(config)?;

    // Records are counted, not kept
    let sink: MemorySink<StructuredRecord> = MemorySink::new();
    let summary = pipeline.run(inputs, &sink)?;

    print_stats_summary(&summary.totals);

    if args.per_file {
        println!("\n{}:", "Per File".cyan().bold());
        let mut files: Vec<_> = summary.files.iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        for file in files {
            let status = match (&file.error, file.cancelled) {
                (Some(_), _) => "failed".red(),
                (None, true) => "cancelled".yellow(),
                (None, false) => "ok".green(),
            };
            println!(
                "  {:50} {:16} {:>8} records {:>6} dropped [{}]",
                file.path, file.dialect, file.statistics.records_emitted, file.statistics.dropped_lines, status
            );
        }
        for file in &summary.files {
            tracing::debug!(file = %file.path, "\n{}", generate_report(&file.statistics));
        }
    }

    print_notification_summary(&summary.notifications);
    let notifications = pipeline.notifications().notifications();
    if !notifications.is_empty() && args.top > 0 {
        println!("\n{} (first {}):", "Details".cyan().bold(), args.top.min(notifications.len()));
        print_notifications(&notifications, args.top);
    }

    print_run_footer(&summary);
    Ok(())
}
