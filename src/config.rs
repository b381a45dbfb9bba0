use crate::error::ParseError;
use serde::{Deserialize, Serialize};

/// Largest accepted pending timeout (about 100 years)
pub const MAX_PENDING_TIMEOUT_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

/// Settings for one ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of worker threads for file-level parallelism (0 = rayon default)
    pub num_threads: usize,

    /// Read buffer per file
    pub buffer_size: usize,

    /// Bound of the record channel built by `IngestPipeline::channel_sink`
    pub queue_capacity: usize,

    /// Placeholder values stripped from every record
    pub blacklist: Vec<String>,

    /// Begins older than the newest observed timestamp minus this many
    /// seconds are swept as timed out. `None` keeps them until flush.
    pub pending_timeout_seconds: Option<i64>,

    /// Observations between timeout sweeps
    pub sweep_interval: usize,

    /// Cap on notifications kept in memory (all are still counted)
    pub max_stored_notifications: usize,

    /// Lines between per-file status log lines (0 = off)
    pub report_interval: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            buffer_size: 64 * 1024, // 64KB
            queue_capacity: 10000,
            blacklist: crate::enrichment::default_blacklist(),
            pending_timeout_seconds: None,
            sweep_interval: 1000,
            max_stored_notifications: 1000,
            report_interval: 0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.buffer_size == 0 {
            return Err(ParseError::config("buffer_size", "Buffer size must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(ParseError::config("queue_capacity", "Queue capacity must be greater than 0"));
        }

        if let Some(timeout) = self.pending_timeout_seconds {
            if timeout <= 0 {
                return Err(ParseError::config(
                    "pending_timeout_seconds",
                    "Pending timeout must be greater than 0",
                ));
            }
            if timeout > MAX_PENDING_TIMEOUT_SECONDS {
                return Err(ParseError::config(
                    "pending_timeout_seconds",
                    format!("Pending timeout must be at most {} seconds", MAX_PENDING_TIMEOUT_SECONDS),
                ));
            }
            if self.sweep_interval == 0 {
                return Err(ParseError::config(
                    "sweep_interval",
                    "Sweep interval must be greater than 0 when a pending timeout is set",
                ));
            }
        }

        Ok(())
    }
}
