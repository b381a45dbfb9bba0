use crate::models::*;
use crate::parsers::regex_parser::SingleLineReader;
use crate::parsers::{DialectParser, Extraction, FieldExtractor, LogUnit, ParserContext};
use serde_json::Value;
use std::io::BufRead;
use std::sync::Arc;

/// One JSON object per physical line
#[derive(Debug, Clone, Default)]
pub struct JsonExtractor;

impl JsonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FieldExtractor for JsonExtractor {
    fn extract(&mut self, unit: &LogUnit) -> Extraction {
        let line = match unit.text() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Extraction::NoMatch,
        };

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(json_obj)) => Extraction::Fields(
                json_obj
                    .into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
            Ok(other_value) => {
                let actual_type = match other_value {
                    Value::Array(_) => "array",
                    Value::String(_) => "string",
                    Value::Number(_) => "number",
                    Value::Bool(_) => "boolean",
                    Value::Null => "null",
                    Value::Object(_) => "object",
                };
                Extraction::Malformed(format!("JSON is not an object, found: {}", actual_type))
            }
            Err(json_error) => Extraction::Malformed(format!("JSON syntax error: {}", json_error)),
        }
    }

    fn format_type(&self) -> FormatType {
        FormatType::JsonLines
    }
}

pub type JsonParser<B> = DialectParser<SingleLineReader<B>, JsonExtractor>;

pub fn json_parser<B: BufRead + Send>(reader: B, context: &ParserContext) -> JsonParser<B> {
    DialectParser::new(
        SingleLineReader::new(reader, Arc::clone(&context.file)),
        JsonExtractor::new(),
        context,
    )
}
