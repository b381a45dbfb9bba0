pub mod models;
pub mod error;
pub mod notifications;
pub mod statistics;
pub mod line_source;
pub mod matcher;
pub mod enrichment;
pub mod parsers;
pub mod dialects;
pub mod config;
pub mod sink;
pub mod correlation;
pub mod pipeline;
pub mod cli;
pub mod commands;

#[cfg(test)]
mod correlation_tests;

pub use models::*;
pub use error::{EngineError, ParseError, RunError};
pub use notifications::{NotificationCollector, NotificationSummary, ProcessingNotifications};
pub use statistics::{ParsingStatistics, StatisticsMonitor};
pub use matcher::{CandidatePattern, PatternList};
pub use enrichment::MetadataEnricher;
pub use parsers::{collect_records, DialectParser, LogParser, ParserContext};
pub use dialects::{build_parser, DialectConfig, DialectKind, DialectRegistry};
pub use config::RunConfig;
pub use sink::{ChannelSink, JsonLinesSink, MemorySink, OutputSink, SinkSummary};
pub use correlation::{
    BuildVersionTracker, CompletedEvent, CorrelationEngine, CorrelationRule, CorrelationStatus, CorrelationSummary,
    EventCorrelator, JobLifecycleCorrelator,
};
pub use pipeline::{CancellationToken, IngestPipeline, PipelineInput, RunSummary};
