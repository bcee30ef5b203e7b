//! Tests for event sinks and subscriptions

use std::sync::Arc;

use threadweaver::{
    ChannelSink, InMemoryEventSink, JobHandle, JobStatus, Weaver, WeaverConfig, WeaverEvent,
};

#[test]
fn test_subscription_sees_job_life_cycle() {
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(1)).unwrap();
    let events = weaver.subscribe();
    let job = JobHandle::from_fn(|_| Ok(()));
    weaver.enqueue(&job).unwrap();
    weaver.finish();

    let kinds: Vec<&str> = events
        .try_iter()
        .filter(|e| e.job().is_some_and(|j| *j == job))
        .map(|e| e.kind())
        .collect();
    assert_eq!(kinds, vec!["thread_busy", "job_started", "job_finished"]);
}

#[test]
fn test_channel_sink_added_later_receives_events() {
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(1)).unwrap();
    let (sink, rx) = ChannelSink::new();
    weaver.add_sink(Arc::new(sink));
    weaver.enqueue(&JobHandle::from_fn(|_| Ok(()))).unwrap();
    weaver.finish();

    assert!(rx.try_iter().any(|e| matches!(
        e,
        WeaverEvent::JobFinished {
            status: JobStatus::Success,
            ..
        }
    )));
}

#[test]
fn test_dropped_subscription_does_not_block_weaver() {
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(2)).unwrap();
    drop(weaver.subscribe());
    for _ in 0..10 {
        weaver.enqueue(&JobHandle::from_fn(|_| Ok(()))).unwrap();
    }
    weaver.finish();
    assert!(weaver.is_idle());
}

#[test]
fn test_in_memory_sink_records_timestamps() {
    let sink = Arc::new(InMemoryEventSink::new(100));
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(1)).unwrap();
    weaver.add_sink(sink.clone());
    weaver.enqueue(&JobHandle::from_fn(|_| Ok(()))).unwrap();
    weaver.finish();

    let recorded = sink.events();
    assert!(!recorded.is_empty());
    assert!(recorded
        .windows(2)
        .all(|w| w[0].recorded_at_ms <= w[1].recorded_at_ms));
    sink.clear();
    assert!(sink.events().is_empty());
}
