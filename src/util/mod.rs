//! Shared utilities: telemetry setup, clock helpers and small serializable value types.

pub mod clock;
pub mod serde;
pub mod telemetry;

pub use self::clock::*;
pub use self::serde::*;
pub use self::telemetry::*;
