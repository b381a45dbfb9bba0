use crate::error::ParseError;
use crate::line_source::LineSource;
use crate::matcher::PatternList;
use crate::models::*;
use crate::parsers::{DialectParser, Extraction, FieldExtractor, LogUnit, ParserContext, UnitPayload, UnitReader};
use std::io::BufRead;
use std::sync::Arc;

/// Reads one physical line per unit
pub struct SingleLineReader<B: BufRead> {
    source: LineSource<B>,
}

impl<B: BufRead> SingleLineReader<B> {
    pub fn new(reader: B, file: Arc<FileIdentity>) -> Self {
        Self {
            source: LineSource::new(reader, file),
        }
    }
}

impl<B: BufRead + Send> UnitReader for SingleLineReader<B> {
    fn read_unit(&mut self) -> Result<Option<LogUnit>, ParseError> {
        Ok(self.source.next_line()?.map(|line| LogUnit {
            payload: UnitPayload::Text(line.text),
            line_number: Some(line.line_number),
            physical_lines: 1,
        }))
    }

    fn is_finished(&self) -> bool {
        self.source.is_finished()
    }

    fn lines_read(&self) -> usize {
        self.source.lines_read()
    }
}

/// Extracts named captures from the first matching candidate pattern
pub struct RegexExtractor {
    patterns: PatternList,
    format_type: FormatType,
}

impl RegexExtractor {
    pub fn new(patterns: PatternList) -> Self {
        Self {
            patterns,
            format_type: FormatType::Regex,
        }
    }

    /// Same extraction, reported as a multi-line record
    pub fn multiline(patterns: PatternList) -> Self {
        Self {
            patterns,
            format_type: FormatType::MultilineRegex,
        }
    }

    pub fn patterns(&self) -> &PatternList {
        &self.patterns
    }
}

impl FieldExtractor for RegexExtractor {
    fn extract(&mut self, unit: &LogUnit) -> Extraction {
        let text = match unit.text() {
            Some(text) => text,
            None => return Extraction::NoMatch,
        };

        match self.patterns.match_text(text) {
            Some(captures) => Extraction::Fields(
                captures
                    .into_iter()
                    .map(|(name, value)| (name, FieldValue::String(value)))
                    .collect(),
            ),
            None => Extraction::NoMatch,
        }
    }

    fn format_type(&self) -> FormatType {
        self.format_type
    }
}

/// Single line → one record
pub type RegexParser<B> = DialectParser<SingleLineReader<B>, RegexExtractor>;

pub fn regex_parser<B: BufRead + Send>(reader: B, patterns: PatternList, context: &ParserContext) -> RegexParser<B> {
    DialectParser::new(
        SingleLineReader::new(reader, Arc::clone(&context.file)),
        RegexExtractor::new(patterns),
        context,
    )
}
