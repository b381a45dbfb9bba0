use serde::Serialize;
use std::fmt;
use std::hash::Hash;

/// Identifier of one logical unit of work whose lifecycle spans several
/// records. Keys are compared field by field, never as joined strings.
pub trait CorrelationKey: Clone + Eq + Hash + fmt::Debug + Serialize + Send + Sync + 'static {}

impl<T> CorrelationKey for T where T: Clone + Eq + Hash + fmt::Debug + Serialize + Send + Sync + 'static {}

/// Background job lifecycle: one worker process running one job type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobKey {
    pub worker: String,
    pub process: String,
    pub job_type: String,
}

impl JobKey {
    pub fn new(worker: impl Into<String>, process: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            process: process.into(),
            job_type: job_type.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.worker, self.process, self.job_type)
    }
}

/// One request and the command it ran
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestKey {
    pub request_id: String,
    pub command: String,
}

impl RequestKey {
    pub fn new(request_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.request_id, self.command)
    }
}
