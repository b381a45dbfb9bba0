use crate::error::ParseError;
use crate::line_source::LineSource;
use crate::matcher::PatternList;
use crate::models::*;
use crate::parsers::regex_parser::RegexExtractor;
use crate::parsers::{DialectParser, LogUnit, ParserContext, UnitPayload, UnitReader};
use regex::RegexSet;
use std::io::BufRead;
use std::sync::Arc;

/// Groups physical lines into logical records.
///
/// A record starts at the current line and absorbs following lines until one
/// matches a delimiter pattern; that line is parked in a single look-ahead
/// slot and becomes the first line of the next record. The slot makes this
/// reader stateful: one instance per stream.
pub struct MultiLineReader<B: BufRead> {
    source: LineSource<B>,
    delimiters: RegexSet,
    lookahead: Option<RawLine>,
}

impl<B: BufRead> MultiLineReader<B> {
    pub fn new<S: AsRef<str>>(reader: B, file: Arc<FileIdentity>, delimiters: &[S]) -> Result<Self, ParseError> {
        if delimiters.is_empty() {
            return Err(ParseError::config(
                "delimiters",
                "At least one delimiter pattern must be specified",
            ));
        }

        let delimiters = RegexSet::new(delimiters.iter().map(|d| d.as_ref())).map_err(|e| ParseError::RegexError {
            pattern: delimiters
                .iter()
                .map(|d| d.as_ref())
                .collect::<Vec<_>>()
                .join(" | "),
            error_message: e.to_string(),
        })?;

        Ok(Self {
            source: LineSource::new(reader, file),
            delimiters,
            lookahead: None,
        })
    }
}

impl<B: BufRead + Send> UnitReader for MultiLineReader<B> {
    fn read_unit(&mut self) -> Result<Option<LogUnit>, ParseError> {
        let first = match self.lookahead.take() {
            Some(line) => line,
            None => match self.source.next_line()? {
                Some(line) => line,
                None => return Ok(None),
            },
        };

        let line_number = first.line_number;
        let mut text = first.text;
        let mut physical_lines = 1;

        while let Some(line) = self.source.next_line()? {
            if self.delimiters.is_match(&line.text) {
                self.lookahead = Some(line);
                break;
            }
            text.push('\n');
            text.push_str(&line.text);
            physical_lines += 1;
        }

        Ok(Some(LogUnit {
            payload: UnitPayload::Text(text),
            line_number: Some(line_number),
            physical_lines,
        }))
    }

    fn is_finished(&self) -> bool {
        self.lookahead.is_none() && self.source.is_finished()
    }

    fn lines_read(&self) -> usize {
        self.source.lines_read()
    }
}

/// N physical lines → one record
pub type MultilineRegexParser<B> = DialectParser<MultiLineReader<B>, RegexExtractor>;

pub fn multiline_parser<B: BufRead + Send, S: AsRef<str>>(
    reader: B,
    patterns: PatternList,
    delimiters: &[S],
    context: &ParserContext,
) -> Result<MultilineRegexParser<B>, ParseError> {
    Ok(DialectParser::new(
        MultiLineReader::new(reader, Arc::clone(&context.file), delimiters)?,
        RegexExtractor::multiline(patterns),
        context,
    ))
}
