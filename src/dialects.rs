use crate::error::ParseError;
use crate::matcher::PatternList;
use crate::models::{FileIdentity, FormatType};
use crate::parsers::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;

/// How a family of log files is laid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum DialectKind {
    Regex {
        patterns: Vec<String>,
    },
    MultilineRegex {
        patterns: Vec<String>,
        delimiters: Vec<String>,
    },
    JsonLines,
    Yaml,
    Csv {
        columns: Vec<String>,
    },
}

/// A named parsing recipe for one family of log files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialectConfig {
    pub name: String,
    /// Name notifications are filed under
    pub reporter: String,
    /// Glob patterns matched against the file name to pick this dialect
    #[serde(default)]
    pub file_patterns: Vec<String>,
    /// Extra timestamp formats tried before the standard ones
    #[serde(default)]
    pub timestamp_formats: Vec<String>,
    #[serde(flatten)]
    pub kind: DialectKind,
}

impl DialectConfig {
    pub fn format_type(&self) -> FormatType {
        match self.kind {
            DialectKind::Regex { .. } => FormatType::Regex,
            DialectKind::MultilineRegex { .. } => FormatType::MultilineRegex,
            DialectKind::JsonLines => FormatType::JsonLines,
            DialectKind::Yaml => FormatType::Yaml,
            DialectKind::Csv { .. } => FormatType::Csv,
        }
    }

    /// Check patterns and columns without opening any stream
    pub fn validate(&self) -> Result<(), ParseError> {
        match &self.kind {
            DialectKind::Regex { patterns } => {
                PatternList::from_patterns(patterns)?;
            }
            DialectKind::MultilineRegex { patterns, delimiters } => {
                PatternList::from_patterns(patterns)?;
                let probe = Arc::new(FileIdentity::new(self.name.clone(), self.name.clone()));
                MultiLineReader::new(std::io::empty(), probe, delimiters)?;
            }
            DialectKind::Csv { columns } => {
                CsvColumnExtractor::new(columns)?;
            }
            DialectKind::JsonLines | DialectKind::Yaml => {}
        }

        for pattern in &self.file_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                ParseError::config(format!("dialects.{}.file_patterns", self.name), e.to_string())
            })?;
        }
        Ok(())
    }

    pub fn matches_file_name(&self, file_name: &str) -> bool {
        self.file_patterns
            .iter()
            .filter_map(|pattern| glob::Pattern::new(pattern).ok())
            .any(|pattern| pattern.matches(file_name))
    }
}

/// Build a parser for one stream. The context carries the file identity,
/// so one call per file.
pub fn build_parser(
    dialect: &DialectConfig,
    context: ParserContext,
    reader: Box<dyn BufRead + Send>,
) -> Result<Box<dyn LogParser>, ParseError> {
    let context = if dialect.timestamp_formats.is_empty() {
        context
    } else {
        context.with_timestamp_formats(dialect.timestamp_formats.clone())
    };

    let parser: Box<dyn LogParser> = match &dialect.kind {
        DialectKind::Regex { patterns } => {
            Box::new(regex_parser(reader, PatternList::from_patterns(patterns)?, &context))
        }
        DialectKind::MultilineRegex { patterns, delimiters } => Box::new(multiline_parser(
            reader,
            PatternList::from_patterns(patterns)?,
            delimiters,
            &context,
        )?),
        DialectKind::JsonLines => Box::new(json_parser(reader, &context)),
        DialectKind::Yaml => Box::new(yaml_parser(reader, &context)),
        DialectKind::Csv { columns } => Box::new(csv_parser(reader, CsvColumnExtractor::new(columns)?, &context)),
    };
    Ok(parser)
}

/// `2020-09-28 00:06:23.382 -0500 4016 main : INFO com.foo.Bar - hello`
pub const JAVA_GENERIC_PATTERN: &str = r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) (?P<ts_offset>[+-]\d{4}) (?P<pid>\d+) (?P<thread>\S+) : (?P<sev>[A-Z]+)\s+(?P<class>\S+) - (?P<message>.*)$";

/// Start of every record in Java service logs
pub const JAVA_HEADER_DELIMITER: &str = r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}[.,]\d{3} ";

/// Backgrounder layout: `ts offset (site,user,session,request) thread service: SEV class - message`
pub const JAVA_CONTEXT_PATTERN: &str = r"(?s)^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) (?P<ts_offset>[+-]\d{4}) \((?P<site>[^,)]*),(?P<user>[^,)]*),(?P<sess>[^,)]*),(?P<req>[^,)]*)[^)]*\) (?P<thread>\S+) (?P<service>[^:\s]+): (?P<sev>[A-Z]+)\s+(?P<class>\S+) - (?P<message>.*)$";

/// Same as the generic Java line, but the message may span lines
pub const JAVA_GENERIC_MULTILINE_PATTERN: &str = r"(?s)^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}) (?P<ts_offset>[+-]\d{4}) (?P<pid>\d+) (?P<thread>\S+) : (?P<sev>[A-Z]+)\s+(?P<class>\S+) - (?P<message>.*)$";

pub const APACHE_ACCESS_PATTERN: &str = r#"^(?P<client_ip>\S+) (?P<ident>\S+) (?P<user>\S+) \[(?P<ts>[^\]]+)\] "(?P<method>[A-Z]+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status>\d{3}) (?P<bytes>\S+)(?: "(?P<referer>[^"]*)" "(?P<user_agent>[^"]*)")?"#;

fn dialect(name: &str, reporter: &str, file_patterns: &[&str], kind: DialectKind) -> DialectConfig {
    DialectConfig {
        name: name.to_string(),
        reporter: reporter.to_string(),
        file_patterns: file_patterns.iter().map(|p| p.to_string()).collect(),
        timestamp_formats: Vec::new(),
        kind,
    }
}

/// Dialects shipped with the binary
pub fn builtin_dialects() -> Vec<DialectConfig> {
    let mut postgres = dialect(
        "postgres_csv",
        "Postgres",
        &["postgresql-*.csv"],
        DialectKind::Csv {
            columns: crate::parsers::csv_parser::POSTGRES_CSVLOG_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        },
    );
    postgres.timestamp_formats = vec![
        "%Y-%m-%d %H:%M:%S%.f GMT".to_string(),
        "%Y-%m-%d %H:%M:%S%.f UTC".to_string(),
    ];

    vec![
        dialect(
            "java_generic",
            "JavaService",
            &["vizportal*.log", "tabadminagent*.log"],
            DialectKind::Regex {
                patterns: vec![JAVA_GENERIC_PATTERN.to_string()],
            },
        ),
        dialect(
            "java_multiline",
            "Backgrounder",
            &["backgrounder*.log"],
            DialectKind::MultilineRegex {
                patterns: vec![
                    JAVA_CONTEXT_PATTERN.to_string(),
                    JAVA_GENERIC_MULTILINE_PATTERN.to_string(),
                ],
                delimiters: vec![JAVA_HEADER_DELIMITER.to_string()],
            },
        ),
        dialect(
            "apache_access",
            "Apache",
            &["access*.log"],
            DialectKind::Regex {
                patterns: vec![APACHE_ACCESS_PATTERN.to_string()],
            },
        ),
        dialect("vizql_json", "VizqlServer", &["nativeapi_*.txt", "*.json"], DialectKind::JsonLines),
        dialect("workgroup_yaml", "Config", &["workgroup.yml", "*.yaml"], DialectKind::Yaml),
        postgres,
    ]
}

/// Dialects by name, in registration order for file-name lookup
#[derive(Debug, Clone, Default)]
pub struct DialectRegistry {
    dialects: BTreeMap<String, DialectConfig>,
    order: Vec<String>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for dialect in builtin_dialects() {
            registry.insert(dialect);
        }
        registry
    }

    /// Register a dialect, replacing any with the same name
    pub fn register(&mut self, dialect: DialectConfig) -> Result<(), ParseError> {
        dialect.validate()?;
        self.insert(dialect);
        Ok(())
    }

    fn insert(&mut self, dialect: DialectConfig) {
        if !self.dialects.contains_key(&dialect.name) {
            self.order.push(dialect.name.clone());
        }
        self.dialects.insert(dialect.name.clone(), dialect);
    }

    /// Load a JSON array of dialects
    pub fn load_json(&mut self, json: &str) -> Result<usize, ParseError> {
        let dialects: Vec<DialectConfig> = serde_json::from_str(json)?;
        self.register_all(dialects)
    }

    /// Load a YAML sequence of dialects
    pub fn load_yaml(&mut self, yaml: &str, source: &str) -> Result<usize, ParseError> {
        let dialects: Vec<DialectConfig> = serde_yaml::from_str(yaml).map_err(|e| ParseError::YamlError {
            file: source.to_string(),
            error_message: e.to_string(),
        })?;
        self.register_all(dialects)
    }

    fn register_all(&mut self, dialects: Vec<DialectConfig>) -> Result<usize, ParseError> {
        let count = dialects.len();
        for dialect in dialects {
            self.register(dialect)?;
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&DialectConfig> {
        self.dialects.get(name)
    }

    /// Most recently registered dialect whose file patterns match
    pub fn for_file_name(&self, file_name: &str) -> Option<&DialectConfig> {
        self.order
            .iter()
            .rev()
            .filter_map(|name| self.dialects.get(name))
            .find(|dialect| dialect.matches_file_name(file_name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ProcessingNotifications;
    use crate::parsers::collect_records;
    use std::io::Cursor;

    fn context(path: &str) -> ParserContext {
        ParserContext::new(FileIdentity::from_path(path), "Test", Arc::new(ProcessingNotifications::new()))
    }

    #[test]
    fn test_builtins_are_valid() {
        for dialect in builtin_dialects() {
            dialect.validate().unwrap_or_else(|e| panic!("{}: {}", dialect.name, e));
        }
    }

    #[test]
    fn test_java_generic_end_to_end() {
        let registry = DialectRegistry::with_builtins();
        let dialect = registry.get("java_generic").unwrap();
        let input = "2020-09-28 00:06:23.382 -0500 4016 main : INFO com.foo.Bar - hello\n";
        let mut parser = build_parser(dialect, context("vizportal.log"), Box::new(Cursor::new(input))).unwrap();
        let records = collect_records(parser.as_mut()).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get_str("ts_offset"), Some("-05:00"));
        assert_eq!(record.get_str("pid"), Some("4016"));
        assert_eq!(record.get_str("thread"), Some("main"));
        assert_eq!(record.get_str("sev"), Some("INFO"));
        assert_eq!(record.get_str("class"), Some("com.foo.Bar"));
        assert_eq!(record.get_str("message"), Some("hello"));
        assert_eq!(parser.format_type(), FormatType::Regex);
    }

    #[test]
    fn test_backgrounder_context_line() {
        let registry = DialectRegistry::with_builtins();
        let dialect = registry.for_file_name("backgrounder-1.log").unwrap();
        assert_eq!(dialect.name, "java_multiline");

        let input = "2020-09-28 00:06:23.382 -0500 (Default,,,,) pool-4-thread-1 backgrounder: INFO  com.tableausoftware.backgrounder.runner.BackgroundJobRunner - Running job of type RefreshExtracts; no timeout; priority: 0; id: 9; args: null\n\tat trace\n";
        let mut parser = build_parser(dialect, context("backgrounder-1.log"), Box::new(Cursor::new(input))).unwrap();
        let records = collect_records(parser.as_mut()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("site"), Some("Default"));
        assert!(records[0].get("user").is_none());
        assert_eq!(records[0].get_str("service"), Some("backgrounder"));
        assert_eq!(
            records[0].get_str("message"),
            Some("Running job of type RefreshExtracts; no timeout; priority: 0; id: 9; args: null\n\tat trace")
        );
    }

    #[test]
    fn test_apache_access_line() {
        let registry = DialectRegistry::with_builtins();
        let dialect = registry.get("apache_access").unwrap();
        let input = "10.0.0.1 - - [28/Sep/2020:00:06:23 -0500] \"GET /views/x HTTP/1.1\" 200 512 \"-\" \"curl\"\n";
        let mut parser = build_parser(dialect, context("access.log"), Box::new(Cursor::new(input))).unwrap();
        let records = collect_records(parser.as_mut()).unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].get("ident").is_none());
        assert!(records[0].get("referer").is_none());
        assert_eq!(records[0].get_str("status"), Some("200"));
        assert_eq!(
            records[0].timestamp().map(|ts| ts.to_string()),
            Some("2020-09-28 00:06:23".to_string())
        );
    }

    #[test]
    fn test_dialect_json_round_trip_and_registration() {
        let json = r#"[{"name":"custom","reporter":"Custom","file_patterns":["custom-*.log"],"format":"regex","patterns":["^(?P<message>.+)$"]}]"#;
        let mut registry = DialectRegistry::with_builtins();
        assert_eq!(registry.load_json(json).unwrap(), 1);

        let dialect = registry.for_file_name("custom-1.log").unwrap();
        assert_eq!(dialect.format_type(), FormatType::Regex);
        assert!(registry.for_file_name("nothing.bin").is_none());
    }

    #[test]
    fn test_yaml_dialect_file() {
        let yaml = "- name: hyper\n  reporter: Hyper\n  file_patterns: [\"hyper_*.log\"]\n  format: json_lines\n";
        let mut registry = DialectRegistry::new();
        assert_eq!(registry.load_yaml(yaml, "dialects.yml").unwrap(), 1);
        assert_eq!(registry.for_file_name("hyper_0.log").unwrap().format_type(), FormatType::JsonLines);

        let broken = registry.load_yaml("- name: [", "broken.yml");
        assert!(matches!(broken, Err(ParseError::YamlError { .. })));
        assert!(matches!(registry.load_json("not json"), Err(ParseError::JsonError { .. })));
    }

    #[test]
    fn test_invalid_dialect_is_rejected() {
        let json = r#"[{"name":"bad","reporter":"Bad","format":"regex","patterns":["(unclosed"]}]"#;
        let mut registry = DialectRegistry::new();
        assert!(matches!(registry.load_json(json), Err(ParseError::RegexError { .. })));

        let no_delimiters = r#"[{"name":"bad","reporter":"Bad","format":"multiline_regex","patterns":["^(?P<m>.*)$"],"delimiters":[]}]"#;
        assert!(matches!(
            registry.load_json(no_delimiters),
            Err(ParseError::ConfigurationError { .. })
        ));
        assert!(registry.names().is_empty());
    }
}
