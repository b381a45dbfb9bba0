use crate::enrichment::MetadataEnricher;
use crate::error::ParseError;
use crate::models::*;
use crate::notifications::NotificationCollector;
use crate::statistics::{ParsingStatistics, StatisticsMonitor};
use std::sync::Arc;
use std::time::Instant;

/// Common interface for all record parsers.
///
/// One parser instance reads exactly one stream and is never shared between
/// threads while in use. `next_record` skips units that yield no record and
/// returns `Ok(None)` only once the stream is exhausted; after that the
/// parser is finished for good.
pub trait LogParser: Send {
    fn next_record(&mut self) -> Result<Option<StructuredRecord>, ParseError>;
    fn is_finished(&self) -> bool;
    fn statistics(&self) -> &ParsingStatistics;
    fn format_type(&self) -> FormatType;
}

/// Payload of one raw unit handed from a reader to an extractor
#[derive(Debug, Clone, PartialEq)]
pub enum UnitPayload {
    Text(String),
    Row(Vec<String>),
}

/// One raw unit: a line, a multi-line block, a whole file or a CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct LogUnit {
    pub payload: UnitPayload,
    /// Line number of the first physical line, if meaningful for the format
    pub line_number: Option<u64>,
    /// Physical lines (or rows) this unit consumed from the stream
    pub physical_lines: usize,
}

impl LogUnit {
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            UnitPayload::Text(text) => Some(text),
            UnitPayload::Row(_) => None,
        }
    }
}

/// Strategy for obtaining the next raw unit from a stream
pub trait UnitReader: Send {
    fn read_unit(&mut self) -> Result<Option<LogUnit>, ParseError>;
    fn is_finished(&self) -> bool;
    fn lines_read(&self) -> usize;
}

/// Result of running an extractor on one unit
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Fields(Fields),
    /// Unit is noise for this dialect; dropped silently
    NoMatch,
    /// Unit is in the right format but could not be decoded
    Malformed(String),
}

/// Strategy for turning one raw unit into fields
pub trait FieldExtractor: Send {
    fn extract(&mut self, unit: &LogUnit) -> Extraction;
    fn format_type(&self) -> FormatType;
}

/// Per-file inputs every parser needs besides its reader and extractor
#[derive(Clone)]
pub struct ParserContext {
    pub file: Arc<FileIdentity>,
    pub reporter: String,
    pub notifications: Arc<dyn NotificationCollector>,
    pub blacklist: Vec<String>,
    pub timestamp_formats: Vec<String>,
    /// Lines between status log lines; 0 disables them
    pub report_interval: usize,
}

impl ParserContext {
    pub fn new(
        file: FileIdentity,
        reporter: impl Into<String>,
        notifications: Arc<dyn NotificationCollector>,
    ) -> Self {
        Self {
            file: Arc::new(file),
            reporter: reporter.into(),
            notifications,
            blacklist: crate::enrichment::default_blacklist(),
            timestamp_formats: Vec::new(),
            report_interval: 0,
        }
    }

    pub fn with_blacklist(mut self, blacklist: Vec<String>) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_timestamp_formats(mut self, formats: Vec<String>) -> Self {
        self.timestamp_formats = formats;
        self
    }

    pub fn with_report_interval(mut self, report_interval: usize) -> Self {
        self.report_interval = report_interval;
        self
    }

    fn enricher(&self) -> MetadataEnricher {
        MetadataEnricher::new(Arc::clone(&self.file), self.reporter.clone(), Arc::clone(&self.notifications))
            .with_blacklist(self.blacklist.clone())
            .with_timestamp_formats(self.timestamp_formats.clone())
    }
}

/// A parser composed of a unit reader, a field extractor and the shared
/// enrichment step
pub struct DialectParser<R: UnitReader, E: FieldExtractor> {
    reader: R,
    extractor: E,
    enricher: MetadataEnricher,
    monitor: StatisticsMonitor,
}

impl<R: UnitReader, E: FieldExtractor> DialectParser<R, E> {
    pub fn new(reader: R, extractor: E, context: &ParserContext) -> Self {
        Self {
            reader,
            extractor,
            enricher: context.enricher(),
            monitor: StatisticsMonitor::with_interval(context.file.path.clone(), context.report_interval),
        }
    }

    /// Physical lines read from the underlying stream so far
    pub fn lines_read(&self) -> usize {
        self.reader.lines_read()
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn file(&self) -> &Arc<FileIdentity> {
        self.enricher.file()
    }
}

impl<R: UnitReader, E: FieldExtractor> LogParser for DialectParser<R, E> {
    fn next_record(&mut self) -> Result<Option<StructuredRecord>, ParseError> {
        loop {
            let start_time = Instant::now();
            let unit = match self.reader.read_unit()? {
                Some(unit) => unit,
                None => return Ok(None),
            };

            match self.extractor.extract(&unit) {
                Extraction::Fields(fields) => {
                    let format_type = self.extractor.format_type();
                    let (record, outcome) = self.enricher.enrich(fields, unit.line_number, format_type);
                    if outcome.timestamp_failed {
                        self.monitor.record_timestamp_failure();
                    }
                    let processing_time = start_time.elapsed().as_micros() as u64;
                    self.monitor.record_emitted(format_type, unit.physical_lines, processing_time);
                    return Ok(Some(record));
                }
                Extraction::NoMatch => {
                    self.monitor.record_dropped(unit.physical_lines);
                }
                Extraction::Malformed(reason) => {
                    tracing::debug!(
                        file = %self.enricher.file().path,
                        line = unit.line_number,
                        "Dropping malformed record: {}",
                        reason
                    );
                    self.monitor.record_malformed(unit.physical_lines);
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    fn statistics(&self) -> &ParsingStatistics {
        self.monitor.get_statistics()
    }

    fn format_type(&self) -> FormatType {
        self.extractor.format_type()
    }
}

impl<R: UnitReader, E: FieldExtractor> Iterator for DialectParser<R, E> {
    type Item = Result<StructuredRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Drain a parser into a vector, stopping at the first I/O error
pub fn collect_records(parser: &mut dyn LogParser) -> Result<Vec<StructuredRecord>, ParseError> {
    let mut records = Vec::new();
    while let Some(record) = parser.next_record()? {
        records.push(record);
    }
    Ok(records)
}

pub mod csv_parser;
pub mod json_parser;
pub mod multiline_parser;
pub mod regex_parser;
pub mod yaml_parser;

pub use csv_parser::{csv_parser, CsvColumnExtractor, CsvParser, CsvRowReader};
pub use json_parser::{json_parser, JsonExtractor, JsonParser};
pub use multiline_parser::{multiline_parser, MultiLineReader, MultilineRegexParser};
pub use regex_parser::{regex_parser, RegexExtractor, RegexParser, SingleLineReader};
pub use yaml_parser::{yaml_parser, WholeFileReader, YamlExtractor, YamlParser};
