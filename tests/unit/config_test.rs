//! Tests for configuration validation

use threadweaver::config::DEFAULT_STACK_SIZE;
use threadweaver::{WeaverConfig, WeaversConfig};

#[test]
fn test_default_config_is_valid() {
    let config = WeaverConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.min_threads, 0);
    assert_eq!(config.max_threads, num_cpus::get());
    assert_eq!(config.thread_stack_size, DEFAULT_STACK_SIZE);
    assert_eq!(config.thread_name_prefix, "weaver");
}

#[test]
fn test_worker_count_sets_both_bounds() {
    let config = WeaverConfig::new().with_worker_count(3);
    assert_eq!(config.min_threads, 3);
    assert_eq!(config.max_threads, 3);
}

#[test]
fn test_config_invalid_max_threads() {
    let invalid = WeaverConfig::new().with_max_threads(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_min_above_max() {
    let invalid = WeaverConfig::new().with_min_threads(5).with_max_threads(2);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("min_threads"));
}

#[test]
fn test_config_tiny_stack() {
    let invalid = WeaverConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_empty_thread_name() {
    let invalid = WeaverConfig::new().with_thread_name_prefix("  ");
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_from_json_fills_defaults() {
    let json = r#"{ "max_threads": 3, "thread_name_prefix": "decode" }"#;
    let config = WeaverConfig::from_json_str(json).unwrap();
    assert_eq!(config.max_threads, 3);
    assert_eq!(config.min_threads, 0);
    assert_eq!(config.thread_name_prefix, "decode");
    assert_eq!(config.thread_stack_size, DEFAULT_STACK_SIZE);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(WeaverConfig::from_json_str(r#"{ "max_threads": 0 }"#).is_err());
    assert!(WeaverConfig::from_json_str("not json").is_err());
}

#[test]
fn test_weavers_config_requires_one_weaver() {
    let empty = WeaversConfig::default();
    assert!(empty.validate().is_err());
}

#[test]
fn test_weavers_config_from_json() {
    let json = r#"{
        "weavers": {
            "thumbnails": { "min_threads": 1, "max_threads": 2 },
            "io": { "max_threads": 8 }
        }
    }"#;
    let config = WeaversConfig::from_json_str(json).unwrap();
    assert_eq!(config.weavers.len(), 2);
    assert_eq!(config.weavers["thumbnails"].max_threads, 2);
}

#[test]
fn test_weavers_config_names_invalid_weaver() {
    let json = r#"{ "weavers": { "broken": { "max_threads": 0 } } }"#;
    let err = WeaversConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("broken"));
}

#[test]
fn test_config_from_env() {
    std::env::set_var("WEAVER_MAX_THREADS", "5");
    std::env::set_var("WEAVER_THREAD_NAME", "env-weaver");
    let config = WeaverConfig::from_env().unwrap();
    assert_eq!(config.max_threads, 5);
    assert_eq!(config.thread_name_prefix, "env-weaver");

    std::env::set_var("WEAVER_MAX_THREADS", "many");
    assert!(WeaverConfig::from_env().is_err());

    std::env::remove_var("WEAVER_MAX_THREADS");
    std::env::remove_var("WEAVER_THREAD_NAME");
}
