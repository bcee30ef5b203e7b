//! Tests for utility functions

use threadweaver::util::{now_ms, DEFAULT_LOG_FILTER};
use threadweaver::{JobHandle, JobId, JobStatus, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serde() {
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
    let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(parsed, Priority::Low);
}

#[test]
fn test_job_ids_are_unique_and_increasing() {
    let a = JobHandle::from_fn(|_| Ok(()));
    let b = JobHandle::from_fn(|_| Ok(()));
    assert!(b.id() > a.id());
    assert_eq!(JobId(3).to_string(), "job-3");
}

#[test]
fn test_job_status_serde() {
    assert_eq!(serde_json::to_string(&JobStatus::Aborted).unwrap(), "\"aborted\"");
    assert!(JobStatus::Aborted.is_finished());
    assert!(!JobStatus::Queued.is_finished());
}

#[test]
fn test_now_ms_is_monotonic_enough() {
    let first = now_ms();
    let second = now_ms();
    assert!(second >= first);
    assert!(first > 0);
}

#[test]
fn test_default_log_filter_targets_crate() {
    assert!(DEFAULT_LOG_FILTER.starts_with("threadweaver"));
}
