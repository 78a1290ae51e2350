//! Messages exchanged over the [`EventBus`](crate::bus::EventBus).

use crate::report::ReportSnapshot;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Name of the analysis workflow request.
pub const MARKETING_WORKFLOW: &str = "MarketingWorkflow";
/// Name of the report assembly request.
pub const REPORT_ASSEMBLY: &str = "ReportAssembly";

/// A job of kind `K` started.
pub struct JobStarted<K> {
    pub job_id: String,
    kind: PhantomData<fn() -> K>,
}

impl<K> JobStarted<K> {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind: PhantomData,
        }
    }
}

impl<K> Clone for JobStarted<K> {
    fn clone(&self) -> Self {
        Self::new(self.job_id.clone())
    }
}

impl<K> fmt::Debug for JobStarted<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStarted")
            .field("kind", &std::any::type_name::<K>())
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// A job ended with `result`.
#[derive(Debug, Clone)]
pub struct JobEnded<T> {
    pub job_id: String,
    pub result: T,
}

/// How an analysis run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    Failed { reason: String },
}

impl WorkflowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowOutcome::Completed)
    }
}

/// The report changed.
#[derive(Debug, Clone)]
pub struct ProgressUpdated {
    pub job_id: String,
    pub report: ReportSnapshot,
}

/// Ask the dispatcher to run the workflow `name` on `payload`.
#[derive(Debug, Clone)]
pub struct WorkflowRequested<T> {
    pub name: String,
    pub payload: T,
}

impl<T> WorkflowRequested<T> {
    pub fn new(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// The report was written.
#[derive(Debug, Clone)]
pub struct ReportFinished {
    pub job_id: String,
    pub report: ReportSnapshot,
    pub output_path: PathBuf,
}
