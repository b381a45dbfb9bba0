use crate::correlation::{Classification, CorrelationRule, JobKey, RequestKey};
use crate::models::{FieldValue, StructuredRecord};
use regex::Regex;
use std::sync::OnceLock;

fn job_start_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Running job of type (?P<job_type>[\w.]+);.*?\bid: (?P<job_id>\d+)")
            .expect("static job start pattern")
    })
}

fn job_end_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Job finished: (?P<end_reason>\w+);.*?\btype ?: ?(?P<job_type>[\w.]+); id: (?P<job_id>\d+)")
            .expect("static job end pattern")
    })
}

/// Pairs backgrounder "Running job of type ..." lines with their
/// "Job finished: ..." lines.
///
/// Keyed by worker, process and job type. The process is the `pid` field
/// when present, otherwise the log file name (one backgrounder per file).
/// A begin only pairs with an end carrying the same job id.
#[derive(Debug, Clone, Default)]
pub struct BackgrounderJobRule;

impl BackgrounderJobRule {
    pub fn new() -> Self {
        Self
    }

    fn key(record: &StructuredRecord, job_type: &str) -> JobKey {
        let process = record
            .get("pid")
            .map(FieldValue::to_string)
            .unwrap_or_else(|| record.metadata.file_name.clone());
        JobKey::new(record.metadata.worker.clone(), process, job_type)
    }

    /// Job id from either a start or an end message
    pub fn job_id(record: &StructuredRecord) -> Option<&str> {
        let message = record.get_str("message")?;
        job_start_pattern()
            .captures(message)
            .or_else(|| job_end_pattern().captures(message))
            .and_then(|captures| captures.name("job_id"))
            .map(|m| m.as_str())
    }
}

impl CorrelationRule for BackgrounderJobRule {
    type Key = JobKey;

    fn name(&self) -> &str {
        "BackgrounderJobs"
    }

    fn classify(&self, record: &StructuredRecord) -> Classification<JobKey> {
        let message = match record.get_str("message") {
            Some(message) => message,
            None => return Classification::Unrelated,
        };

        if let Some(captures) = job_start_pattern().captures(message) {
            return Classification::Begin(Self::key(record, &captures["job_type"]));
        }
        if let Some(captures) = job_end_pattern().captures(message) {
            return Classification::End(Self::key(record, &captures["job_type"]));
        }
        Classification::Unrelated
    }

    fn is_matching_end(&self, begin: &StructuredRecord, end: &StructuredRecord) -> bool {
        Self::job_id(begin) == Self::job_id(end)
    }
}

/// Pairs JSON begin/end events (`k` = `begin-query` / `end-query` by
/// default) keyed by request id and command.
#[derive(Debug, Clone)]
pub struct QueryEventRule {
    name: String,
    event_field: String,
    begin_event: String,
    end_event: String,
    request_field: String,
    command_path: String,
}

impl QueryEventRule {
    pub fn new(
        name: impl Into<String>,
        begin_event: impl Into<String>,
        end_event: impl Into<String>,
        command_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event_field: "k".to_string(),
            begin_event: begin_event.into(),
            end_event: end_event.into(),
            request_field: "req".to_string(),
            command_path: command_path.into(),
        }
    }

    /// Query begin/end events of the VizQL server
    pub fn vizql_queries() -> Self {
        Self::new("VizqlQueries", "begin-query", "end-query", "v.protocol-id")
    }

    pub fn with_event_field(mut self, event_field: impl Into<String>) -> Self {
        self.event_field = event_field.into();
        self
    }

    pub fn with_request_field(mut self, request_field: impl Into<String>) -> Self {
        self.request_field = request_field.into();
        self
    }
}

impl CorrelationRule for QueryEventRule {
    type Key = RequestKey;

    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, record: &StructuredRecord) -> Classification<RequestKey> {
        let is_begin = match record.get_str(&self.event_field) {
            Some(event) if event == self.begin_event => true,
            Some(event) if event == self.end_event => false,
            _ => return Classification::Unrelated,
        };

        // "-" request ids were stripped during enrichment and land here
        let request_id = match record.get_path(&self.request_field) {
            Some(value) => value.to_string(),
            None => {
                return Classification::MissingKey {
                    field: self.request_field.clone(),
                }
            }
        };
        let command = match record.get_path(&self.command_path) {
            Some(value) => value.to_string(),
            None => {
                return Classification::MissingKey {
                    field: self.command_path.clone(),
                }
            }
        };

        let key = RequestKey::new(request_id, command);
        if is_begin {
            Classification::Begin(key)
        } else {
            Classification::End(key)
        }
    }
}
