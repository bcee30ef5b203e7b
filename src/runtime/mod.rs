//! Tokio adapters: awaiting a weaver and consuming its events from async code.

pub mod tokio_bridge;

pub use tokio_bridge::TokioBridge;
