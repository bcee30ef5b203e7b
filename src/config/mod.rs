//! Configuration models for weavers.

pub mod weaver;

pub use weaver::{WeaverConfig, WeaversConfig, DEFAULT_STACK_SIZE};
