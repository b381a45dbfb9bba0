use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "logshark")]
#[command(author, version, about = "Multi-dialect log ingestion with begin/end event correlation")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Number of parallel threads (0 = auto-detect)
    #[arg(long, short = 'j', global = true, default_value = "0")]
    pub parallel: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse log files and output structured records
    Parse(ParseArgs),

    /// Show parsing statistics and notification counts
    Stats(StatsArgs),

    /// List the available dialects
    Dialects(DialectsArgs),
}

/// Options shared by every command that reads log files
#[derive(Args, Clone)]
pub struct InputArgs {
    /// Log files to read (supports glob patterns)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Dialect to use for every file (default: chosen by file name)
    #[arg(long, short)]
    pub dialect: Option<String>,

    /// Extra dialect definitions (.json, .yml or .yaml)
    #[arg(long)]
    pub dialect_file: Option<PathBuf>,

    /// Worker / shard id recorded on every record
    #[arg(long, short, default_value = "worker0")]
    pub worker: String,

    /// Line number assigned to the first line of each file
    #[arg(long, default_value = "1")]
    pub start_line: u64,
}

#[derive(Args)]
pub struct ParseArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Output file (default: stdout)
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Pair backgrounder jobs and query begin/end events
    #[arg(long, short)]
    pub correlate: bool,

    /// Correlation pending timeout in seconds
    #[arg(long)]
    pub pending_timeout: Option<i64>,

    /// Maximum number of records to print
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Show per-file statistics
    #[arg(long)]
    pub per_file: bool,

    /// Number of notifications to show
    #[arg(long, default_value = "10")]
    pub top: usize,
}

#[derive(Args)]
pub struct DialectsArgs {
    /// Extra dialect definitions (.json, .yml or .yaml)
    #[arg(long)]
    pub dialect_file: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON array
    Json,
    /// Newline-delimited JSON
    Jsonl,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}
