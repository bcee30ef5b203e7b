//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;

use threadweaver::{
    build_weavers, InMemoryEventSink, JobHandle, WeaverBuilder, WeaverConfig, WeaverError,
    WeaverEvent, WeaversConfig,
};

#[test]
fn test_builder_defaults() {
    let weaver = WeaverBuilder::new().build().unwrap();
    assert_eq!(weaver.config(), &WeaverConfig::default());
    assert_eq!(weaver.current_number_of_threads(), 0);
}

#[test]
fn test_builder_applies_settings() {
    let weaver = WeaverBuilder::new()
        .max_threads(4)
        .min_threads(2)
        .thread_name_prefix("thumbs")
        .build()
        .unwrap();
    assert_eq!(weaver.max_threads(), 4);
    assert_eq!(weaver.current_number_of_threads(), 2);
    assert_eq!(weaver.config().thread_name_prefix, "thumbs");
}

#[test]
fn test_builder_sink_sees_thread_creation() {
    let sink = Arc::new(InMemoryEventSink::new(64));
    let weaver = WeaverBuilder::new()
        .worker_count(2)
        .sink(sink.clone())
        .with_tracing_sink()
        .build()
        .unwrap();

    let job = JobHandle::from_fn(|_| Ok(()));
    weaver.enqueue(&job).unwrap();
    weaver.finish();

    assert_eq!(sink.count(|e| matches!(e, WeaverEvent::ThreadCreated(_))), 2);
    assert_eq!(sink.count(|e| matches!(e, WeaverEvent::JobFinished { .. })), 1);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = WeaverBuilder::new().worker_count(0).build().unwrap_err();
    assert!(matches!(err, WeaverError::InvalidConfig(_)));
}

#[test]
fn test_build_weavers_from_config() {
    let mut weavers = HashMap::new();
    weavers.insert("io".to_string(), WeaverConfig::new().with_worker_count(1));
    weavers.insert("cpu".to_string(), WeaverConfig::new().with_max_threads(2));
    let built = build_weavers(&WeaversConfig { weavers }).unwrap();

    assert_eq!(built.len(), 2);
    assert_eq!(built["io"].current_number_of_threads(), 1);
    assert_eq!(built["cpu"].max_threads(), 2);
    assert_ne!(built["io"].id(), built["cpu"].id());
}

#[test]
fn test_build_weavers_rejects_empty_config() {
    let err = build_weavers(&WeaversConfig::default()).unwrap_err();
    assert!(matches!(err, WeaverError::InvalidConfig(_)));
}
