use crate::error::ParseError;
use crate::models::*;
use crate::parsers::{DialectParser, Extraction, FieldExtractor, LogUnit, ParserContext, UnitPayload, UnitReader};
use csv::{ByteRecord, ReaderBuilder};
use std::io::Read;
use std::sync::Arc;

/// Column layout of PostgreSQL `csvlog` output. The first column is named
/// `ts` so it goes through timestamp standardization.
pub const POSTGRES_CSVLOG_COLUMNS: &[&str] = &[
    "ts",
    "user_name",
    "database_name",
    "process_id",
    "connection_from",
    "session_id",
    "session_line_num",
    "command_tag",
    "session_start_time",
    "virtual_transaction_id",
    "transaction_id",
    "error_severity",
    "sql_state_code",
    "message",
    "detail",
    "hint",
    "internal_query",
    "internal_query_pos",
    "context",
    "query",
    "query_pos",
    "location",
    "application_name",
];

/// Reads headerless CSV rows. Quoted fields may span physical lines.
pub struct CsvRowReader<R: Read> {
    reader: csv::Reader<R>,
    file: Arc<FileIdentity>,
    record: ByteRecord,
    rows_read: u64,
    lines_read: usize,
    finished: bool,
}

impl<R: Read> CsvRowReader<R> {
    pub fn new(reader: R, file: Arc<FileIdentity>) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        Self {
            reader,
            file,
            record: ByteRecord::new(),
            rows_read: 0,
            lines_read: 0,
            finished: false,
        }
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl<R: Read + Send> UnitReader for CsvRowReader<R> {
    fn read_unit(&mut self) -> Result<Option<LogUnit>, ParseError> {
        if self.finished {
            return Ok(None);
        }

        let has_row = self.reader.read_byte_record(&mut self.record).map_err(|e| ParseError::CsvError {
            file: self.file.path.clone(),
            error_message: e.to_string(),
        })?;
        if !has_row {
            self.finished = true;
            return Ok(None);
        }

        let row: Vec<String> = self
            .record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();

        // Embedded newlines belong to the same row but still count as lines read
        let physical_lines = 1 + row.iter().map(|field| field.matches('\n').count()).sum::<usize>();
        let line_number = self.file.start_line + self.rows_read;
        self.rows_read += 1;
        self.lines_read += physical_lines;

        Ok(Some(LogUnit {
            payload: UnitPayload::Row(row),
            line_number: Some(line_number),
            physical_lines,
        }))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn lines_read(&self) -> usize {
        self.lines_read
    }
}

/// Maps column ordinals to field names. Columns past the end of the
/// layout are kept as `column_<ordinal>`.
#[derive(Debug, Clone)]
pub struct CsvColumnExtractor {
    columns: Vec<String>,
}

impl CsvColumnExtractor {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Result<Self, ParseError> {
        if columns.is_empty() {
            return Err(ParseError::config("columns", "At least one column name must be specified"));
        }
        Ok(Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        })
    }

    pub fn postgres() -> Self {
        Self {
            columns: POSTGRES_CSVLOG_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl FieldExtractor for CsvColumnExtractor {
    fn extract(&mut self, unit: &LogUnit) -> Extraction {
        let row = match &unit.payload {
            UnitPayload::Row(row) => row,
            UnitPayload::Text(_) => return Extraction::NoMatch,
        };

        if row.iter().all(|value| value.is_empty()) {
            return Extraction::NoMatch;
        }

        let fields = row
            .iter()
            .enumerate()
            .map(|(ordinal, value)| {
                let name = match self.columns.get(ordinal) {
                    Some(name) => name.clone(),
                    None => format!("column_{}", ordinal),
                };
                (name, FieldValue::String(value.clone()))
            })
            .collect();

        Extraction::Fields(fields)
    }

    fn format_type(&self) -> FormatType {
        FormatType::Csv
    }
}

/// One row → one record
pub type CsvParser<R> = DialectParser<CsvRowReader<R>, CsvColumnExtractor>;

pub fn csv_parser<R: Read + Send>(reader: R, columns: CsvColumnExtractor, context: &ParserContext) -> CsvParser<R> {
    DialectParser::new(CsvRowReader::new(reader, Arc::clone(&context.file)), columns, context)
}
