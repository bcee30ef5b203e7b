//! Error types for scheduler operations and job bodies.

use thiserror::Error;

use crate::util::serde::JobId;

/// Errors produced by the weaver when submitting or wiring jobs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WeaverError {
    /// The weaver is shutting down and accepts no more work.
    #[error("weaver is shutting down")]
    ShuttingDown,
    /// The job is already waiting in a queue or being executed.
    #[error("{0} is already queued or running")]
    AlreadyQueued(JobId),
    /// The job has already been executed; jobs run at most once.
    #[error("{0} has already been executed")]
    AlreadyExecuted(JobId),
    /// Adding the dependency would make a job wait for itself.
    #[error("dependency of {job} on {dependency} would create a cycle")]
    DependencyCycle {
        /// The job that would wait.
        job: JobId,
        /// The job it would wait for.
        dependency: JobId,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
    /// Follow-up work was submitted from a job that is not executed by a weaver.
    #[error("job is not executing inside a weaver")]
    NotAttached,
}

/// Abnormal termination of a job body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The body reported a failure.
    #[error("job failed: {0}")]
    Failed(String),
    /// The body panicked; the payload message is kept.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The job was removed before it could run.
    #[error("job aborted")]
    Aborted,
}

impl JobError {
    /// Convenience constructor for [`JobError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
