use std::fmt;

/// Errors raised while building parsers or reading log streams.
///
/// Bad input data never surfaces here: unmatched lines, malformed records and
/// bad timestamps are counted and reported through notifications instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Regex compilation failed
    RegexError {
        pattern: String,
        error_message: String,
    },
    /// A dialect or run configuration is invalid
    ConfigurationError {
        parameter: String,
        error_message: String,
    },
    /// I/O error while reading a stream
    IoError {
        operation: String,
        error_message: String,
    },
    /// A YAML file could not be parsed at all
    YamlError {
        file: String,
        error_message: String,
    },
    /// A CSV stream could not be read
    CsvError {
        file: String,
        error_message: String,
    },
    /// A dialect file could not be decoded
    JsonError {
        message: String,
        line_number: Option<usize>,
        column: Option<usize>,
    },
}

impl ParseError {
    pub fn io(operation: impl Into<String>, error: &std::io::Error) -> Self {
        ParseError::IoError {
            operation: operation.into(),
            error_message: error.to_string(),
        }
    }

    pub fn config(parameter: impl Into<String>, error_message: impl Into<String>) -> Self {
        ParseError::ConfigurationError {
            parameter: parameter.into(),
            error_message: error_message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::RegexError { pattern, error_message } => {
                write!(f, "Regex error for pattern '{}': {}", pattern, error_message)
            }
            ParseError::ConfigurationError { parameter, error_message } => {
                write!(f, "Configuration error for '{}': {}", parameter, error_message)
            }
            ParseError::IoError { operation, error_message } => {
                write!(f, "I/O error during {}: {}", operation, error_message)
            }
            ParseError::YamlError { file, error_message } => {
                write!(f, "YAML error in '{}': {}", file, error_message)
            }
            ParseError::CsvError { file, error_message } => {
                write!(f, "CSV error in '{}': {}", file, error_message)
            }
            ParseError::JsonError { message, line_number, column } => {
                write!(f, "JSON error: {}", message)?;
                if let Some(line) = line_number {
                    write!(f, " at line {}", line)?;
                }
                if let Some(col) = column {
                    write!(f, " column {}", col)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        ParseError::JsonError {
            message: error.to_string(),
            line_number: Some(error.line()),
            column: Some(error.column()),
        }
    }
}

/// Programmer-logic violations of the correlation engine.
///
/// These indicate a bug in the caller, not bad input, and are meant to end
/// the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A record was observed after the engine was shut down
    ObservedAfterShutdown { reporter: String },
    /// The engine was flushed twice
    AlreadyShutDown { reporter: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ObservedAfterShutdown { reporter } => {
                write!(f, "{}: record observed after shutdown", reporter)
            }
            EngineError::AlreadyShutDown { reporter } => {
                write!(f, "{}: engine already shut down", reporter)
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Failure that ends an ingestion run
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    Parse(ParseError),
    Engine(EngineError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Parse(error) => write!(f, "{}", error),
            RunError::Engine(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Parse(error) => Some(error),
            RunError::Engine(error) => Some(error),
        }
    }
}

impl From<ParseError> for RunError {
    fn from(error: ParseError) -> Self {
        RunError::Parse(error)
    }
}

impl From<EngineError> for RunError {
    fn from(error: EngineError) -> Self {
        RunError::Engine(error)
    }
}
