//! Tests for error types

use threadweaver::{JobError, JobId, WeaverError};

#[test]
fn test_shutting_down_error() {
    assert_eq!(format!("{}", WeaverError::ShuttingDown), "weaver is shutting down");
}

#[test]
fn test_already_executed_error() {
    let err = WeaverError::AlreadyExecuted(JobId(12));
    assert_eq!(format!("{}", err), "job-12 has already been executed");
}

#[test]
fn test_invalid_config_error() {
    let err = WeaverError::InvalidConfig("max_threads must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_threads must be greater than 0"
    );
}

#[test]
fn test_thread_spawn_error() {
    let err = WeaverError::ThreadSpawn("resource temporarily unavailable".to_string());
    assert_eq!(
        format!("{}", err),
        "failed to spawn worker thread: resource temporarily unavailable"
    );
}

#[test]
fn test_not_attached_error() {
    assert_eq!(
        format!("{}", WeaverError::NotAttached),
        "job is not executing inside a weaver"
    );
}

#[test]
fn test_job_error_converts_into_anyhow() {
    let err: anyhow::Error = JobError::failed("checksum mismatch").into();
    assert_eq!(err.to_string(), "job failed: checksum mismatch");
}
