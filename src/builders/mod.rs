//! Builders to construct weavers from configuration.

pub mod weaver_builder;

pub use weaver_builder::{build_weavers, WeaverBuilder};
