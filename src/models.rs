use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Field name → value mapping carried by every record
pub type Fields = BTreeMap<String, FieldValue>;

/// Name of the canonical timestamp field
pub const TIMESTAMP_FIELD: &str = "ts";
/// Name of the canonical timezone offset field
pub const TIMESTAMP_OFFSET_FIELD: &str = "ts_offset";
/// Keys `StructuredRecord` writes next to its fields when serialized
pub const RESERVED_FIELD_NAMES: [&str; 6] = ["id", "file_path", "file_name", "worker", "line_number", "format_type"];

/// A single extracted value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    String(String),
    List(Vec<FieldValue>),
    Map(Fields),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// True if this is a string equal to one of the blacklisted placeholders
    pub fn is_placeholder(&self, blacklist: &[String]) -> bool {
        match self {
            FieldValue::String(s) => blacklist.iter().any(|b| b == s),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.3f")),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            FieldValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(obj) => FieldValue::Map(
                obj.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect(),
            ),
        }
    }
}

impl From<serde_yaml::Value> for FieldValue {
    fn from(value: serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => FieldValue::Null,
            serde_yaml::Value::Bool(b) => FieldValue::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => FieldValue::String(s),
            serde_yaml::Value::Sequence(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            serde_yaml::Value::Mapping(mapping) => FieldValue::Map(
                mapping
                    .into_iter()
                    .map(|(k, v)| (yaml_key_to_string(k), FieldValue::from(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => FieldValue::from(tagged.value),
        }
    }
}

pub(crate) fn yaml_key_to_string(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Static identity of one logical log file, supplied by the run orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Path of the file inside the extracted archive
    pub path: String,
    /// Logical file name (e.g. "vizqlserver_1.txt")
    pub logical_name: String,
    /// Shard / worker id the file came from
    pub worker: String,
    /// Line number assigned to the first line of this stream
    pub start_line: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileIdentity {
    pub fn new(path: impl Into<String>, logical_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            logical_name: logical_name.into(),
            worker: "worker0".to_string(),
            start_line: 1,
            last_modified: None,
        }
    }

    /// Derive the logical name from the last path segment
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let logical_name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self::new(path, logical_name)
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn with_start_line(mut self, start_line: u64) -> Self {
        self.start_line = start_line;
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Path with forward slashes and no leading "./", used for id generation
    pub fn normalized_path(&self) -> String {
        let path = self.path.replace('\\', "/");
        path.trim_start_matches("./").to_string()
    }
}

/// One physical line read from a log file
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub text: String,
    pub line_number: u64,
    pub file: Arc<FileIdentity>,
}

/// Which parser family produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    Regex,
    MultilineRegex,
    JsonLines,
    Yaml,
    Csv,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Regex => "regex",
            FormatType::MultilineRegex => "multiline_regex",
            FormatType::JsonLines => "json_lines",
            FormatType::Yaml => "yaml",
            FormatType::Csv => "csv",
        }
    }
}

/// File/line metadata attached to every record during enrichment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordMetadata {
    pub file_path: String,
    pub file_name: String,
    pub worker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
}

/// Normalized key/value representation of one parsed log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub metadata: RecordMetadata,
    pub format_type: FormatType,
    #[serde(flatten)]
    fields: Fields,
}

impl StructuredRecord {
    pub fn new(id: Uuid, metadata: RecordMetadata, format_type: FormatType, fields: Fields) -> Self {
        Self {
            id,
            metadata,
            format_type,
            fields,
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    /// Look up a nested field by dotted path, e.g. `v.protocol-id`
    pub fn get_path(&self, path: &str) -> Option<&FieldValue> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Canonical timestamp, if the record has one
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.fields.get(TIMESTAMP_FIELD).and_then(FieldValue::as_timestamp)
    }

    pub fn line_number(&self) -> Option<u64> {
        self.metadata.line_number
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}
