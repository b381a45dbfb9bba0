use crate::error::ParseError;
use crate::line_source::LineSource;
use crate::models::*;
use crate::parsers::{DialectParser, Extraction, FieldExtractor, LogUnit, ParserContext, UnitPayload, UnitReader};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;

/// Reads the whole stream as a single unit, then reports finished
pub struct WholeFileReader<B: BufRead> {
    source: LineSource<B>,
    consumed: bool,
}

impl<B: BufRead> WholeFileReader<B> {
    pub fn new(reader: B, file: Arc<FileIdentity>) -> Self {
        Self {
            source: LineSource::new(reader, file),
            consumed: false,
        }
    }
}

impl<B: BufRead + Send> UnitReader for WholeFileReader<B> {
    fn read_unit(&mut self) -> Result<Option<LogUnit>, ParseError> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;

        let text = self.source.read_to_end()?;
        let physical_lines = self.source.lines_read();
        if physical_lines == 0 {
            return Ok(None);
        }

        Ok(Some(LogUnit {
            payload: UnitPayload::Text(text),
            line_number: None,
            physical_lines,
        }))
    }

    fn is_finished(&self) -> bool {
        self.consumed
    }

    fn lines_read(&self) -> usize {
        self.source.lines_read()
    }
}

/// Parses every YAML document in the unit and pivots dotted keys
/// (`worker0.backgrounder.port`) into a nested hierarchy.
///
/// A document that is not a mapping is skipped. A syntax error ends the
/// stream, but documents before it are kept.
#[derive(Debug, Clone, Default)]
pub struct YamlExtractor {
    skipped_documents: usize,
}

impl YamlExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents dropped so far for being malformed
    pub fn skipped_documents(&self) -> usize {
        self.skipped_documents
    }

    fn skip(&mut self, reason: String) {
        self.skipped_documents += 1;
        tracing::warn!("Skipping YAML document: {}", reason);
    }
}

impl FieldExtractor for YamlExtractor {
    fn extract(&mut self, unit: &LogUnit) -> Extraction {
        let text = match unit.text() {
            Some(text) => text,
            None => return Extraction::NoMatch,
        };

        let mut fields = Fields::new();
        let mut first_error = None;
        for document in serde_yaml::Deserializer::from_str(text) {
            match serde_yaml::Value::deserialize(document) {
                Ok(serde_yaml::Value::Mapping(mapping)) => {
                    for (key, value) in mapping {
                        let key = yaml_key_to_string(key);
                        let segments: Vec<&str> = key.split('.').collect();
                        insert_path(&mut fields, &segments, FieldValue::from(value));
                    }
                }
                Ok(serde_yaml::Value::Null) => {}
                Ok(_) => {
                    let reason = "YAML document is not a mapping".to_string();
                    self.skip(reason.clone());
                    first_error.get_or_insert(reason);
                }
                Err(e) => {
                    let reason = format!("YAML syntax error: {}", e);
                    self.skip(reason.clone());
                    first_error.get_or_insert(reason);
                    break;
                }
            }
        }

        match (fields.is_empty(), first_error) {
            (false, _) => Extraction::Fields(fields),
            (true, Some(reason)) => Extraction::Malformed(reason),
            (true, None) => Extraction::NoMatch,
        }
    }

    fn format_type(&self) -> FormatType {
        FormatType::Yaml
    }
}

/// Insert `value` at the dotted path, merging into maps that already exist.
/// A later scalar replaces an earlier value at the same path.
fn insert_path(fields: &mut Fields, segments: &[&str], value: FieldValue) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if rest.is_empty() {
        match (fields.get_mut(*head), value) {
            (Some(FieldValue::Map(existing)), FieldValue::Map(incoming)) => {
                for (key, nested) in incoming {
                    insert_path(existing, &[key.as_str()], nested);
                }
            }
            (_, value) => {
                fields.insert(head.to_string(), value);
            }
        }
        return;
    }

    let entry = fields
        .entry(head.to_string())
        .or_insert_with(|| FieldValue::Map(Fields::new()));
    if !matches!(entry, FieldValue::Map(_)) {
        *entry = FieldValue::Map(Fields::new());
    }
    if let FieldValue::Map(nested) = entry {
        insert_path(nested, rest, value);
    }
}

/// Whole file → one record
pub type YamlParser<B> = DialectParser<WholeFileReader<B>, YamlExtractor>;

pub fn yaml_parser<B: BufRead + Send>(reader: B, context: &ParserContext) -> YamlParser<B> {
    DialectParser::new(
        WholeFileReader::new(reader, Arc::clone(&context.file)),
        YamlExtractor::new(),
        context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ProcessingNotifications;
    use crate::parsers::LogParser;
    use std::io::Cursor;

    fn context() -> ParserContext {
        let file = FileIdentity::new("worker0/config/workgroup.yml", "workgroup.yml");
        ParserContext::new(file, "Config", Arc::new(ProcessingNotifications::new()))
    }

    fn nested<'a>(fields: &'a Fields, path: &[&str]) -> Option<&'a FieldValue> {
        let (last, parents) = path.split_last()?;
        let mut current = fields;
        for segment in parents {
            current = current.get(*segment)?.as_map()?;
        }
        current.get(*last)
    }

    #[test]
    fn test_dotted_keys_are_pivoted() {
        let input = "worker0.backgrounder.port: 8250\nworker0.backgrounder.procs: 2\nworker1.vizqlserver.port: 9100\nservice.name: tableau\n";
        let mut parser = yaml_parser(Cursor::new(input), &context());

        let record = parser.next_record().unwrap().unwrap();
        assert!(parser.is_finished());
        let fields = record.fields();
        assert_eq!(nested(fields, &["worker0", "backgrounder", "port"]), Some(&FieldValue::Integer(8250)));
        assert_eq!(nested(fields, &["worker0", "backgrounder", "procs"]), Some(&FieldValue::Integer(2)));
        assert_eq!(nested(fields, &["worker1", "vizqlserver", "port"]), Some(&FieldValue::Integer(9100)));
        assert_eq!(nested(fields, &["service", "name"]), Some(&FieldValue::from("tableau")));
        assert_eq!(record.line_number(), None);
        assert_eq!(record.format_type, FormatType::Yaml);

        assert!(parser.next_record().unwrap().is_none());
        assert_eq!(parser.statistics().lines_read, 4);
        assert!(parser.statistics().is_balanced());
    }

    #[test]
    fn test_multiple_documents_merge() {
        let input = "a.b: 1\n---\na.c: 2\nplain:\n  nested: yes-value\n";
        let mut parser = yaml_parser(Cursor::new(input), &context());
        let record = parser.next_record().unwrap().unwrap();
        let fields = record.fields();
        assert_eq!(nested(fields, &["a", "b"]), Some(&FieldValue::Integer(1)));
        assert_eq!(nested(fields, &["a", "c"]), Some(&FieldValue::Integer(2)));
        assert_eq!(nested(fields, &["plain", "nested"]), Some(&FieldValue::from("yes-value")));
    }

    #[test]
    fn test_broken_yaml_yields_nothing() {
        let input = "key: [unclosed\n";
        let mut parser = yaml_parser(Cursor::new(input), &context());
        assert!(parser.next_record().unwrap().is_none());
        assert!(parser.is_finished());
        assert_eq!(parser.statistics().malformed_lines, 1);
    }

    #[test]
    fn test_bad_document_is_skipped_and_earlier_ones_kept() {
        let input = "a.b: 1\n---\n- not\n- a mapping\n---\na.c: 2\n---\nkey: [unclosed\n";
        let mut parser = yaml_parser(Cursor::new(input), &context());

        let record = parser.next_record().unwrap().unwrap();
        let fields = record.fields();
        assert_eq!(nested(fields, &["a", "b"]), Some(&FieldValue::Integer(1)));
        assert_eq!(nested(fields, &["a", "c"]), Some(&FieldValue::Integer(2)));
        assert_eq!(parser.extractor().skipped_documents(), 2);
        assert_eq!(parser.statistics().malformed_lines, 0);
        assert!(parser.statistics().is_balanced());
    }

    #[test]
    fn test_empty_file() {
        let mut parser = yaml_parser(Cursor::new(""), &context());
        assert!(parser.next_record().unwrap().is_none());
        assert!(parser.is_finished());
    }

    #[test]
    fn test_insert_path_scalar_then_map() {
        let mut fields = Fields::new();
        insert_path(&mut fields, &["a"], FieldValue::Integer(1));
        insert_path(&mut fields, &["a", "b"], FieldValue::Integer(2));
        assert_eq!(nested(&fields, &["a", "b"]), Some(&FieldValue::Integer(2)));
    }
}
