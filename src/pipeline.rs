use crate::config::RunConfig;
use crate::correlation::{CorrelationSummary, EventCorrelator};
use crate::dialects::{build_parser, DialectConfig};
use crate::error::{ParseError, RunError};
use crate::models::{FileIdentity, StructuredRecord};
use crate::notifications::{NotificationCollector, NotificationSummary, ProcessingNotifications};
use crate::parsers::ParserContext;
use crate::sink::{ChannelSink, OutputSink, SinkSummary};
use crate::statistics::ParsingStatistics;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where a file's bytes come from
#[derive(Debug, Clone)]
pub enum InputSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// One file to ingest and the dialect to read it with
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub identity: FileIdentity,
    pub dialect: Arc<DialectConfig>,
    pub source: InputSource,
}

impl PipelineInput {
    pub fn from_path(path: impl Into<PathBuf>, dialect: Arc<DialectConfig>) -> Self {
        let path = path.into();
        Self {
            identity: FileIdentity::from_path(path.to_string_lossy().into_owned()),
            dialect,
            source: InputSource::File(path),
        }
    }

    pub fn from_bytes(identity: FileIdentity, dialect: Arc<DialectConfig>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            identity,
            dialect,
            source: InputSource::Bytes(bytes.into()),
        }
    }

    fn open(&self, buffer_size: usize) -> Result<(Box<dyn BufRead + Send>, FileIdentity), ParseError> {
        match &self.source {
            InputSource::File(path) => {
                let file = File::open(path).map_err(|e| ParseError::io(format!("opening '{}'", path.display()), &e))?;
                let mut identity = self.identity.clone();
                if identity.last_modified.is_none() {
                    if let Ok(modified) = file.metadata().and_then(|m| m.modified()) {
                        identity.last_modified = Some(DateTime::<Utc>::from(modified));
                    }
                }
                Ok((Box::new(BufReader::with_capacity(buffer_size, file)), identity))
            }
            InputSource::Bytes(bytes) => Ok((Box::new(Cursor::new(bytes.clone())), self.identity.clone())),
        }
    }
}

/// Shared flag checked between records; a record in progress is always
/// finished before the run stops
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub dialect: String,
    pub statistics: ParsingStatistics,
    /// Read error that ended this file early
    pub error: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileOutcome>,
    pub totals: ParsingStatistics,
    pub records: SinkSummary,
    pub correlations: Vec<CorrelationSummary>,
    pub notifications: NotificationSummary,
    pub cancelled: bool,
    pub elapsed_millis: u64,
}

/// Parses many files in parallel, one parser per file, forwarding every
/// record to the correlators and then to the record sink
pub struct IngestPipeline {
    config: RunConfig,
    notifications: Arc<ProcessingNotifications>,
    correlators: Vec<Arc<dyn EventCorrelator>>,
    cancellation: CancellationToken,
}

impl IngestPipeline {
    pub fn new(config: RunConfig) -> Result<Self, ParseError> {
        config.validate()?;
        let notifications = Arc::new(ProcessingNotifications::with_capacity(config.max_stored_notifications));
        Ok(Self {
            config,
            notifications,
            correlators: Vec::new(),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_correlator(mut self, correlator: Arc<dyn EventCorrelator>) -> Self {
        self.correlators.push(correlator);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn notifications(&self) -> &Arc<ProcessingNotifications> {
        &self.notifications
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Record sink bounded by `queue_capacity`, with the receiving end for a consumer
    pub fn channel_sink<T>(&self) -> (ChannelSink<T>, Receiver<T>) {
        ChannelSink::bounded(self.config.queue_capacity)
    }

    /// Ingest every input, then flush the correlators and close the sink.
    ///
    /// Read errors end only the affected file. Invalid dialects and engine
    /// misuse end the run; the correlators are still flushed and the sink
    /// closed before the error is returned.
    pub fn run(
        &self,
        inputs: Vec<PipelineInput>,
        records: &dyn OutputSink<StructuredRecord>,
    ) -> Result<RunSummary, RunError> {
        let start_time = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| ParseError::config("num_threads", e.to_string()))?;

        tracing::info!(files = inputs.len(), "Starting ingestion");

        let processed = pool.install(|| {
            inputs
                .par_iter()
                .map(|input| self.process_file(input, records))
                .collect::<Result<Vec<_>, RunError>>()
        });

        // Correlators are flushed and the sink closed even when a file failed
        let shutdowns: Vec<_> = self.correlators.iter().map(|correlator| correlator.shutdown()).collect();
        let sink_summary = records.close();

        let files = match processed {
            Ok(files) => files,
            Err(e) => {
                for summary in shutdowns.iter().flatten() {
                    tracing::warn!(
                        reporter = %summary.reporter,
                        events = summary.events(),
                        "Correlator flushed after a failed run"
                    );
                }
                tracing::error!(
                    persisted = sink_summary.persisted,
                    ignored = sink_summary.ignored,
                    "Ingestion failed: {}",
                    e
                );
                return Err(e);
            }
        };
        let correlations = shutdowns.into_iter().collect::<Result<Vec<_>, _>>()?;

        let mut totals = ParsingStatistics::new();
        for outcome in &files {
            totals.merge(&outcome.statistics);
        }

        let summary = RunSummary {
            cancelled: files.iter().any(|f| f.cancelled),
            files,
            totals,
            records: sink_summary,
            correlations,
            notifications: self.notifications.summary(),
            elapsed_millis: start_time.elapsed().as_millis() as u64,
        };

        tracing::info!(
            records = summary.totals.records_emitted,
            errors = summary.notifications.errors,
            warnings = summary.notifications.warnings,
            cancelled = summary.cancelled,
            "Ingestion finished in {}ms",
            summary.elapsed_millis
        );
        Ok(summary)
    }

    fn process_file(
        &self,
        input: &PipelineInput,
        records: &dyn OutputSink<StructuredRecord>,
    ) -> Result<FileOutcome, RunError> {
        let mut outcome = FileOutcome {
            path: input.identity.path.clone(),
            dialect: input.dialect.name.clone(),
            statistics: ParsingStatistics::new(),
            error: None,
            cancelled: false,
        };

        let (reader, identity) = match input.open(self.config.buffer_size) {
            Ok(opened) => opened,
            Err(e) => {
                self.report_read_error(input, &e);
                outcome.error = Some(e.to_string());
                return Ok(outcome);
            }
        };

        let context = ParserContext::new(identity, input.dialect.reporter.clone(), self.notifications.clone())
            .with_blacklist(self.config.blacklist.clone())
            .with_report_interval(self.config.report_interval);
        let mut parser = build_parser(&input.dialect, context, reader)?;

        loop {
            if self.cancellation.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            match parser.next_record() {
                Ok(Some(record)) => {
                    for correlator in &self.correlators {
                        correlator.observe(&record)?;
                    }
                    records.add_record(record);
                }
                Ok(None) => break,
                Err(e) => {
                    self.report_read_error(input, &e);
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }

        outcome.statistics = parser.statistics().clone();
        tracing::info!(
            file = %outcome.path,
            dialect = %outcome.dialect,
            records = outcome.statistics.records_emitted,
            dropped = outcome.statistics.dropped_lines,
            "Finished file"
        );
        Ok(outcome)
    }

    fn report_read_error(&self, input: &PipelineInput, error: &ParseError) {
        self.notifications
            .report_error(&error.to_string(), &input.identity.path, None, &input.dialect.reporter);
    }
}
