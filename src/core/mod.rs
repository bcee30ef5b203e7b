//! Core scheduling abstractions: jobs, composites, policies, workers and the weaver.

pub mod composite;
pub mod error;
pub mod events;
pub mod job;
pub mod policy;
pub mod weaver;
pub mod worker;

pub use composite::{JobCollection, JobSequence};
pub use error::{AppResult, JobError, WeaverError};
pub use events::{
    ChannelSink, EventSink, InMemoryEventSink, RecordedEvent, TracingSink, WeaverEvent,
};
pub use job::{job_fn, FnJob, Job, JobContext, JobHandle, JobStatus};
pub use policy::{QueuePolicy, ResourceRestrictionPolicy};
pub use weaver::{Weaver, WeaverState};
pub use worker::{WorkerId, WorkerState};
