use crate::models::*;
use crate::notifications::NotificationCollector;
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Namespace for record ids; changing it changes every id ever produced
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_6773_6861_726b_8000_0000_0000_0001);

/// Default placeholder values stripped from every record
pub fn default_blacklist() -> Vec<String> {
    vec![String::new(), "-".to_string()]
}

/// Timestamp stored when a record's timestamp cannot be parsed
pub fn sentinel_timestamp() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Formats tried, in order, after any dialect-specific formats
const STANDARD_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%b/%Y:%H:%M:%S",
    "%a %b %d %H:%M:%S %Y",
];

/// Deterministic id for a record of `file` at `line_number`
pub fn synthetic_id(file: &FileIdentity, line_number: Option<u64>) -> Uuid {
    let key = match line_number {
        Some(line) => format!("{}|{}|{}", file.normalized_path(), file.logical_name, line),
        None => format!("{}|{}", file.normalized_path(), file.logical_name),
    };
    Uuid::new_v5(&RECORD_ID_NAMESPACE, key.as_bytes())
}

/// Parse a timestamp string into the canonical (local, offset-free) form
pub fn standardize_timestamp(input: &str, custom_formats: &[String]) -> Option<NaiveDateTime> {
    let trimmed = input.trim();

    for format in custom_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.naive_local());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }

    // Apache style carries its own offset: "10/Oct/2000:13:55:36 -0700"
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%d/%b/%Y:%H:%M:%S %z") {
        return Some(dt.naive_local());
    }

    STANDARD_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}

/// Interpret a numeric epoch as seconds, or milliseconds when too large for seconds
pub fn timestamp_from_epoch(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() >= 1e11 { value } else { value * 1000.0 };
    DateTime::from_timestamp_millis(millis.round() as i64).map(|dt| dt.naive_utc())
}

fn offset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:UTC|GMT)?([+-])(\d{1,2}):?(\d{2})?$").expect("static offset pattern")
    })
}

/// Normalize a timezone offset to `±HH:MM`
pub fn standardize_offset(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("gmt") {
        return Some("+00:00".to_string());
    }

    let captures = offset_pattern().captures(trimmed)?;
    let sign = captures.get(1)?.as_str();
    let hours: u32 = captures.get(2)?.as_str().parse().ok()?;
    let minutes: u32 = captures.get(3).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(format!("{}{:02}:{:02}", sign, hours, minutes))
}

/// Remove placeholder values, descending into nested maps
pub fn strip_blacklisted(fields: &mut Fields, blacklist: &[String]) {
    fields.retain(|_, value| !value.is_placeholder(blacklist));
    for value in fields.values_mut() {
        if let FieldValue::Map(nested) = value {
            strip_blacklisted(nested, blacklist);
        }
    }
}

/// Move top-level fields named like record metadata to `field_<name>`, so
/// serialized records never carry duplicate keys
pub fn rename_reserved(fields: &mut Fields) {
    for reserved in RESERVED_FIELD_NAMES {
        if let Some(value) = fields.remove(reserved) {
            let mut renamed = format!("field_{}", reserved);
            while fields.contains_key(&renamed) {
                renamed.insert_str(0, "field_");
            }
            fields.insert(renamed, value);
        }
    }
}

/// Outcome flags the parser folds into its statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    pub timestamp_failed: bool,
}

/// Cross-cutting normalization applied after field extraction by every parser
pub struct MetadataEnricher {
    file: Arc<FileIdentity>,
    reporter: String,
    blacklist: Vec<String>,
    timestamp_formats: Vec<String>,
    notifications: Arc<dyn NotificationCollector>,
}

impl MetadataEnricher {
    pub fn new(
        file: Arc<FileIdentity>,
        reporter: impl Into<String>,
        notifications: Arc<dyn NotificationCollector>,
    ) -> Self {
        Self {
            file,
            reporter: reporter.into(),
            blacklist: default_blacklist(),
            timestamp_formats: Vec::new(),
            notifications,
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

    pub fn file(&self) -> &Arc<FileIdentity> {
        &self.file
    }

    /// Normalize extracted fields and wrap them into a record
    pub fn enrich(
        &self,
        mut fields: Fields,
        line_number: Option<u64>,
        format_type: FormatType,
    ) -> (StructuredRecord, EnrichmentOutcome) {
        let mut outcome = EnrichmentOutcome::default();

        strip_blacklisted(&mut fields, &self.blacklist);
        rename_reserved(&mut fields);

        let standardized = fields.get(TIMESTAMP_FIELD).map(|raw| {
            let parsed = match raw {
                FieldValue::Timestamp(ts) => Some(*ts),
                FieldValue::String(s) => standardize_timestamp(s, &self.timestamp_formats),
                FieldValue::Integer(i) => timestamp_from_epoch(*i as f64),
                FieldValue::Float(x) => timestamp_from_epoch(*x),
                _ => None,
            };
            parsed.unwrap_or_else(|| {
                outcome.timestamp_failed = true;
                self.notifications.report_warning(
                    &format!("Unparsable timestamp '{}', using sentinel", raw),
                    &self.file.path,
                    line_number,
                    &self.reporter,
                );
                sentinel_timestamp()
            })
        });
        if let Some(ts) = standardized {
            fields.insert(TIMESTAMP_FIELD.to_string(), FieldValue::Timestamp(ts));
        }

        let offset = match fields.get(TIMESTAMP_OFFSET_FIELD) {
            Some(FieldValue::String(raw)) => standardize_offset(raw),
            _ => None,
        };
        if let Some(offset) = offset {
            fields.insert(TIMESTAMP_OFFSET_FIELD.to_string(), FieldValue::String(offset));
        }

        let metadata = RecordMetadata {
            file_path: self.file.path.clone(),
            file_name: self.file.logical_name.clone(),
            worker: self.file.worker.clone(),
            line_number,
        };
        let id = synthetic_id(&self.file, line_number);

        (StructuredRecord::new(id, metadata, format_type, fields), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ProcessingNotifications;
    use chrono::NaiveDate;
    use quickcheck_macros::quickcheck;

    fn enricher(notifications: Arc<ProcessingNotifications>) -> MetadataEnricher {
        let file = Arc::new(FileIdentity::new("worker1/logs/app.log", "app.log").with_worker("worker1"));
        MetadataEnricher::new(file, "TestDialect", notifications)
    }

    #[test]
    fn test_standardize_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 9, 28)
            .unwrap()
            .and_hms_milli_opt(0, 6, 23, 382)
            .unwrap();
        assert_eq!(standardize_timestamp("2020-09-28 00:06:23.382", &[]), Some(expected));
        assert_eq!(standardize_timestamp("2020-09-28T00:06:23.382", &[]), Some(expected));
        assert_eq!(standardize_timestamp("2020-09-28 00:06:23,382", &[]), Some(expected));
        assert_eq!(standardize_timestamp("2020-09-28T00:06:23.382Z", &[]), Some(expected));
        assert!(standardize_timestamp("10/Oct/2000:13:55:36 -0700", &[]).is_some());
        assert!(standardize_timestamp("yesterday", &[]).is_none());
    }

    #[test]
    fn test_custom_format_wins() {
        let formats = vec!["%d.%m.%Y %H:%M".to_string()];
        let ts = standardize_timestamp("28.09.2020 00:06", &formats).unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2020-09-28 00:06");
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        let seconds = timestamp_from_epoch(1_601_251_583.0).unwrap();
        let millis = timestamp_from_epoch(1_601_251_583_000.0).unwrap();
        assert_eq!(seconds, millis);
        assert!(timestamp_from_epoch(f64::NAN).is_none());
    }

    #[test]
    fn test_standardize_offset() {
        assert_eq!(standardize_offset("-0500").as_deref(), Some("-05:00"));
        assert_eq!(standardize_offset("+05:30").as_deref(), Some("+05:30"));
        assert_eq!(standardize_offset("-05").as_deref(), Some("-05:00"));
        assert_eq!(standardize_offset("Z").as_deref(), Some("+00:00"));
        assert_eq!(standardize_offset("UTC+0100").as_deref(), Some("+01:00"));
        assert_eq!(standardize_offset("PST"), None);
        assert_eq!(standardize_offset("+9900"), None);
    }

    #[test]
    fn test_enrich_attaches_metadata() {
        let notifications = Arc::new(ProcessingNotifications::new());
        let enricher = enricher(Arc::clone(&notifications));
        let mut fields = Fields::new();
        fields.insert("ts".to_string(), FieldValue::from("2020-09-28 00:06:23.382"));
        fields.insert("ts_offset".to_string(), FieldValue::from("-0500"));
        fields.insert("req".to_string(), FieldValue::from("-"));
        fields.insert("user".to_string(), FieldValue::from(""));

        let (record, outcome) = enricher.enrich(fields, Some(42), FormatType::Regex);

        assert!(!outcome.timestamp_failed);
        assert!(record.timestamp().is_some());
        assert_eq!(record.get_str("ts_offset"), Some("-05:00"));
        assert!(record.get("req").is_none());
        assert!(record.get("user").is_none());
        assert_eq!(record.metadata.worker, "worker1");
        assert_eq!(record.metadata.file_name, "app.log");
        assert_eq!(record.line_number(), Some(42));
        assert_eq!(notifications.summary().warnings, 0);
    }

    #[test]
    fn test_metadata_named_fields_are_renamed() {
        let enricher = enricher(Arc::new(ProcessingNotifications::new()));
        let mut fields = Fields::new();
        fields.insert("id".to_string(), FieldValue::Integer(7));
        fields.insert("line_number".to_string(), FieldValue::from("x"));
        fields.insert("field_line_number".to_string(), FieldValue::from("taken"));

        let (record, _) = enricher.enrich(fields, Some(3), FormatType::JsonLines);

        assert!(record.get("id").is_none());
        assert_eq!(record.get("field_id"), Some(&FieldValue::Integer(7)));
        assert_eq!(record.get_str("field_line_number"), Some("taken"));
        assert_eq!(record.get_str("field_field_line_number"), Some("x"));

        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line.matches("\"id\":").count(), 1);
        assert_eq!(line.matches("\"line_number\":").count(), 1);
    }

    #[test]
    fn test_bad_timestamp_kept_with_sentinel() {
        let notifications = Arc::new(ProcessingNotifications::new());
        let enricher = enricher(Arc::clone(&notifications));
        let mut fields = Fields::new();
        fields.insert("ts".to_string(), FieldValue::from("not a time"));
        fields.insert("message".to_string(), FieldValue::from("kept"));

        let (record, outcome) = enricher.enrich(fields, Some(1), FormatType::Regex);

        assert!(outcome.timestamp_failed);
        assert_eq!(record.timestamp(), Some(sentinel_timestamp()));
        assert_eq!(record.get_str("message"), Some("kept"));
        assert_eq!(notifications.warnings_for("TestDialect"), 1);
    }

    #[test]
    fn test_nested_placeholders_are_stripped() {
        let mut inner = Fields::new();
        inner.insert("port".to_string(), FieldValue::from("-"));
        inner.insert("host".to_string(), FieldValue::from("node1"));
        let mut fields = Fields::new();
        fields.insert("worker0".to_string(), FieldValue::Map(inner));

        strip_blacklisted(&mut fields, &default_blacklist());

        let worker = fields.get("worker0").and_then(FieldValue::as_map).unwrap();
        assert!(worker.get("port").is_none());
        assert_eq!(worker.get("host"), Some(&FieldValue::from("node1")));
    }

    #[test]
    fn test_id_depends_on_line_and_file() {
        let a = FileIdentity::new("w/a.log", "a.log");
        let b = FileIdentity::new("w/b.log", "b.log");
        assert_ne!(synthetic_id(&a, Some(1)), synthetic_id(&a, Some(2)));
        assert_ne!(synthetic_id(&a, Some(1)), synthetic_id(&b, Some(1)));
        assert_ne!(synthetic_id(&a, Some(1)), synthetic_id(&a, None));
        // Separators differ but the normalized path is the same
        let windows = FileIdentity::new("w\\a.log", "a.log");
        assert_eq!(synthetic_id(&a, Some(7)), synthetic_id(&windows, Some(7)));
    }

    #[quickcheck]
    fn prop_id_is_deterministic(path: String, name: String, line: u64) -> bool {
        let first = FileIdentity::new(path.clone(), name.clone());
        let second = FileIdentity::new(path, name);
        synthetic_id(&first, Some(line)) == synthetic_id(&second, Some(line))
    }

    #[quickcheck]
    fn prop_no_placeholder_survives(values: Vec<(String, bool)>) -> bool {
        let blacklist = default_blacklist();
        let mut fields = Fields::new();
        for (i, (value, dash)) in values.into_iter().enumerate() {
            let value = if dash { "-".to_string() } else { value };
            fields.insert(format!("f{}", i), FieldValue::String(value));
        }
        strip_blacklisted(&mut fields, &blacklist);
        fields.values().all(|v| !v.is_placeholder(&blacklist))
    }
}
