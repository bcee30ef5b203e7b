//! # ThreadWeaver
//!
//! A cooperative thread-pool job scheduler with job dependencies, admission policies and job
//! sequences.
//!
//! A [`Weaver`] owns a bounded pool of worker threads and a queue of pending jobs. Workers
//! repeatedly apply for work: they report the job they just finished and receive the next job
//! whose dependencies all finished and whose queue policies admit it. Everything that
//! happens is reported as a [`WeaverEvent`] to sinks and channel subscribers, without ever
//! blocking the worker that posts it.
//!
//! ## Key Features
//!
//! - **Dependencies**: a job becomes eligible only once every job it depends on finished;
//!   a dependency dropped before it ran no longer blocks anything
//! - **Composites**: [`JobSequence`] runs children strictly in order and by default aborts
//!   the rest on failure; [`JobCollection`] runs children in any order
//! - **Admission control**: [`QueuePolicy`] implementations such as
//!   [`ResourceRestrictionPolicy`] cap how many jobs of a kind run at once
//! - **Suspend/resume and drain**: stop assigning work without touching running jobs, or
//!   block until the weaver is idle
//! - **Failure containment**: job errors and panics are reported, never propagated
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use threadweaver::{JobHandle, JobSequence, ResourceRestrictionPolicy, Weaver, WeaverConfig};
//!
//! let weaver = Weaver::new(WeaverConfig::new().with_max_threads(4))?;
//! let events = weaver.subscribe();
//!
//! let decoders = Arc::new(ResourceRestrictionPolicy::new(2));
//! let sequence = JobSequence::new();
//! for path in ["a.png", "b.png", "c.png"] {
//!     let job = JobHandle::from_fn(move |_| decode(path));
//!     job.assign_queue_policy(decoders.clone());
//!     sequence.append(&job);
//! }
//!
//! weaver.enqueue(&sequence)?;
//! weaver.finish();
//! assert!(weaver.is_idle());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Jobs, composites, policies, workers and the weaver.
pub mod core;
/// Configuration models for weavers.
pub mod config;
/// Builders to construct weavers from configuration.
pub mod builders;
/// Tokio adapters.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::{build_weavers, WeaverBuilder};
pub use crate::config::{WeaverConfig, WeaversConfig};
pub use crate::core::{
    job_fn, ChannelSink, EventSink, InMemoryEventSink, Job, JobCollection, JobContext, JobError,
    JobHandle, JobSequence, JobStatus, QueuePolicy, ResourceRestrictionPolicy, TracingSink,
    Weaver, WeaverError, WeaverEvent, WeaverState, WorkerId, WorkerState,
};
pub use crate::util::serde::{JobId, Priority};
