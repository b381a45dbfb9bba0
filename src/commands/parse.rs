use crate::cli::{InputArgs, OutputFormat, ParseArgs};
use crate::commands::output::{print_correlation_summary, print_run_footer, print_stats_summary, OutputFormatter};
use crate::config::RunConfig;
use crate::correlation::{
    BackgrounderJobRule, CompletedEvent, CorrelationEngine, JobKey, JobLifecycleCorrelator, QueryEventRule,
    RequestKey,
};
use crate::dialects::DialectRegistry;
use crate::models::StructuredRecord;
use crate::notifications::NotificationCollector;
use crate::pipeline::{IngestPipeline, PipelineInput};
use crate::sink::{JsonLinesSink, MemorySink, OutputSink};
use chrono::TimeDelta;
use glob::glob;
use std::fs::{self, File};
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn run_parse(args: ParseArgs, parallel: usize) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(args.input.dialect_file.as_deref())?;
    let inputs = resolve_inputs(&args.input, &registry)?;

    if inputs.is_empty() {
        eprintln!("No files matched the given patterns");
        return Ok(());
    }

    let config = RunConfig {
        num_threads: parallel,
        pending_timeout_seconds: args.pending_timeout,
        ..RunConfig::default()
    };
    let sweep_interval = config.sweep_interval;
    let mut pipeline = IngestPipeline::new(config)?;
    let pending_timeout = pending_timeout(args.pending_timeout)?;

    let job_events: Arc<MemorySink<CompletedEvent<JobKey>>> = Arc::new(MemorySink::new());
    let query_events: Arc<MemorySink<CompletedEvent<RequestKey>>> = Arc::new(MemorySink::new());
    if args.correlate {
        let notifications: Arc<dyn NotificationCollector> = pipeline.notifications().clone();
        let jobs = JobLifecycleCorrelator::new(BackgrounderJobRule::new(), job_events.clone(), notifications.clone());
        let mut queries = CorrelationEngine::new(QueryEventRule::vizql_queries(), query_events.clone(), notifications);
        if let Some(timeout) = pending_timeout {
            queries = queries.with_pending_timeout(timeout, sweep_interval);
        }
        pipeline = pipeline.with_correlator(Arc::new(jobs)).with_correlator(Arc::new(queries));
    }

    let mut output: Box<dyn Write + Send> = if let Some(ref path) = args.output_file {
        Box::new(File::create(path)?)
    } else {
        Box::new(stdout())
    };
    let formatter = OutputFormatter::new(args.output);

    // Unlimited JSON lines stream straight to the output; everything else is
    // collected so it can be sorted and truncated.
    let summary = if args.output == OutputFormat::Jsonl && args.limit.is_none() {
        let sink = JsonLinesSink::new(output);
        let summary = pipeline.run(inputs, &sink)?;
        output = sink.into_inner();
        summary
    } else {
        let sink: MemorySink<StructuredRecord> = MemorySink::new();
        let summary = pipeline.run(inputs, &sink)?;
        let mut records = sink.take();
        records.sort_by(|a, b| {
            a.metadata
                .file_path
                .cmp(&b.metadata.file_path)
                .then_with(|| a.line_number().cmp(&b.line_number()))
        });
        if let Some(limit) = args.limit {
            records.truncate(limit);
        }

        formatter.print_header(&mut output)?;
        if !records.is_empty() {
            writeln!(output, "{}", formatter.format_records(&records))?;
        }
        summary
    };

    if args.correlate {
        for event in job_events.take() {
            writeln!(output, "{}", formatter.format_event(&event))?;
        }
        for event in query_events.take() {
            writeln!(output, "{}", formatter.format_event(&event))?;
        }
        job_events.close();
        query_events.close();
        print_correlation_summary(&summary.correlations);
    }
    output.flush()?;

    if args.output_file.is_some() {
        print_stats_summary(&summary.totals);
    }
    print_run_footer(&summary);

    Ok(())
}

/// `--pending-timeout` as a duration; range checked by `RunConfig::validate`
fn pending_timeout(seconds: Option<i64>) -> Result<Option<TimeDelta>, Box<dyn std::error::Error>> {
    match seconds {
        Some(s) => match TimeDelta::try_seconds(s) {
            Some(timeout) => Ok(Some(timeout)),
            None => Err(format!("Pending timeout of {}s is out of range", s).into()),
        },
        None => Ok(None),
    }
}

/// Built-in dialects plus any loaded from `dialect_file`
pub fn load_registry(dialect_file: Option<&Path>) -> Result<DialectRegistry, Box<dyn std::error::Error>> {
    let mut registry = DialectRegistry::with_builtins();
    if let Some(path) = dialect_file {
        let contents = fs::read_to_string(path)?;
        let source = path.to_string_lossy();
        let loaded = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => registry.load_yaml(&contents, &source)?,
            _ => registry.load_json(&contents)?,
        };
        tracing::info!(file = %source, dialects = loaded, "Loaded dialect definitions");
    }
    Ok(registry)
}

/// Expand globs and pair each file with its dialect. Files no dialect
/// claims are skipped with a message.
pub fn resolve_inputs(
    input: &InputArgs,
    registry: &DialectRegistry,
) -> Result<Vec<PipelineInput>, Box<dyn std::error::Error>> {
    let forced = match input.dialect.as_deref() {
        Some(name) => Some(Arc::new(
            registry
                .get(name)
                .cloned()
                .ok_or_else(|| format!("Unknown dialect '{}'; known: {}", name, registry.names().join(", ")))?,
        )),
        None => None,
    };

    let mut inputs = Vec::new();
    for path in expand_globs(&input.files)? {
        let dialect = match &forced {
            Some(dialect) => dialect.clone(),
            None => {
                let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                match registry.for_file_name(&file_name) {
                    Some(dialect) => Arc::new(dialect.clone()),
                    None => {
                        eprintln!("Skipping {}: no dialect matches (use --dialect)", path.display());
                        continue;
                    }
                }
            }
        };

        let mut pipeline_input = PipelineInput::from_path(path, dialect);
        pipeline_input.identity = pipeline_input
            .identity
            .with_worker(input.worker.clone())
            .with_start_line(input.start_line);
        inputs.push(pipeline_input);
    }
    Ok(inputs)
}

pub fn expand_globs(patterns: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let pattern_str = pattern.to_string_lossy();
        if pattern_str.contains('*') || pattern_str.contains('?') {
            for entry in glob(&pattern_str)? {
                files.push(entry?);
            }
        } else {
            files.push(pattern.clone());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_args(files: &[&str], dialect: Option<&str>) -> InputArgs {
        InputArgs {
            files: files.iter().map(PathBuf::from).collect(),
            dialect: dialect.map(str::to_string),
            dialect_file: None,
            worker: "worker3".to_string(),
            start_line: 10,
        }
    }

    #[test]
    fn test_dialect_chosen_by_file_name() {
        let registry = DialectRegistry::with_builtins();
        let inputs = resolve_inputs(
            &input_args(&["logs/vizportal_node1.log", "logs/postgresql-2020.csv", "logs/unknown.bin"], None),
            &registry,
        )
        .unwrap();

        let dialects: Vec<_> = inputs.iter().map(|i| i.dialect.name.as_str()).collect();
        assert_eq!(dialects, vec!["java_generic", "postgres_csv"]);
        assert_eq!(inputs[0].identity.worker, "worker3");
        assert_eq!(inputs[0].identity.start_line, 10);
        assert_eq!(inputs[0].identity.logical_name, "vizportal_node1.log");
    }

    #[test]
    fn test_forced_dialect_applies_to_every_file() {
        let registry = DialectRegistry::with_builtins();
        let inputs = resolve_inputs(&input_args(&["a.txt", "b.txt"], Some("vizql_json")), &registry).unwrap();
        assert!(inputs.iter().all(|i| i.dialect.name == "vizql_json"));
    }

    #[test]
    fn test_unknown_dialect_is_an_error() {
        let registry = DialectRegistry::with_builtins();
        assert!(resolve_inputs(&input_args(&["a.txt"], Some("nope")), &registry).is_err());
    }

    #[test]
    fn test_pending_timeout_conversion() {
        assert_eq!(pending_timeout(None).unwrap(), None);
        assert_eq!(pending_timeout(Some(600)).unwrap(), Some(TimeDelta::minutes(10)));
        assert!(pending_timeout(Some(i64::MAX)).is_err());
    }

    #[test]
    fn test_plain_paths_are_not_globbed() {
        let files = expand_globs(&[PathBuf::from("/does/not/exist.log")]).unwrap();
        assert_eq!(files, vec![PathBuf::from("/does/not/exist.log")]);
    }
}
