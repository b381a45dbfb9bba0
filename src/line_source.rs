use crate::error::ParseError;
use crate::models::{FileIdentity, RawLine};
use std::io::BufRead;
use std::sync::Arc;

/// Sequential reader over one logical log file.
///
/// Numbers lines starting at `FileIdentity::start_line`, so shards of the
/// same file processed in parallel number consistently. Once the end of the
/// stream is reached the source stays finished.
pub struct LineSource<B: BufRead> {
    reader: B,
    file: Arc<FileIdentity>,
    next_line_number: u64,
    lines_read: usize,
    finished: bool,
    buffer: Vec<u8>,
}

impl<B: BufRead> LineSource<B> {
    pub fn new(reader: B, file: Arc<FileIdentity>) -> Self {
        Self {
            next_line_number: file.start_line,
            reader,
            file,
            lines_read: 0,
            finished: false,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Read the next physical line, or `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Result<Option<RawLine>, ParseError> {
        if self.finished {
            return Ok(None);
        }

        self.buffer.clear();
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.buffer)
            .map_err(|e| ParseError::io(format!("reading '{}'", self.file.path), &e))?;

        if bytes_read == 0 {
            self.finished = true;
            return Ok(None);
        }

        if self.buffer.ends_with(b"\n") {
            self.buffer.pop();
            if self.buffer.ends_with(b"\r") {
                self.buffer.pop();
            }
        }

        let line = RawLine {
            text: String::from_utf8_lossy(&self.buffer).into_owned(),
            line_number: self.next_line_number,
            file: Arc::clone(&self.file),
        };
        self.next_line_number += 1;
        self.lines_read += 1;
        Ok(Some(line))
    }

    /// Read everything that is left as one string
    pub fn read_to_end(&mut self) -> Result<String, ParseError> {
        let mut text = String::new();
        let mut first = true;
        while let Some(line) = self.next_line()? {
            if !first {
                text.push('\n');
            }
            first = false;
            text.push_str(&line.text);
        }
        Ok(text)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    /// Line number the next line will carry
    pub fn next_line_number(&self) -> u64 {
        self.next_line_number
    }

    pub fn file(&self) -> &Arc<FileIdentity> {
        &self.file
    }
}
