//! Life-cycle notifications posted by workers and the weaver.
//!
//! Posting never blocks the poster: sinks either buffer in memory, write to an unbounded
//! channel, or log. When and where a notification is processed is up to the consumer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::error::JobError;
use crate::core::job::{JobHandle, JobStatus};
use crate::core::worker::WorkerId;
use crate::util::clock::now_ms;

/// A scheduler life-cycle transition.
#[derive(Debug, Clone)]
pub enum WeaverEvent {
    /// A worker started executing a job.
    ///
    /// A composite is started when a worker picks it up, which is before its children are
    /// queued. Its first child therefore reports its own start after the composite's.
    JobStarted {
        /// The job.
        job: JobHandle,
        /// The executing worker.
        worker: WorkerId,
    },
    /// A job reached a final status.
    JobFinished {
        /// The job.
        job: JobHandle,
        /// Worker that executed (or settled) the job, if any.
        worker: Option<WorkerId>,
        /// Final status.
        status: JobStatus,
        /// Failure reason for failed or aborted jobs.
        error: Option<JobError>,
    },
    /// The last running job completed and no eligible job is left in the queue.
    Finished,
    /// The weaver is suspended and no job is running any more.
    Suspended,
    /// A worker thread was spawned.
    ThreadCreated(WorkerId),
    /// A worker thread left its loop.
    ThreadDestroyed(WorkerId),
    /// A worker was assigned a job.
    ThreadBusy {
        /// The worker.
        worker: WorkerId,
        /// The assigned job.
        job: JobHandle,
    },
    /// A worker found nothing to do and went to sleep.
    ThreadSuspended(WorkerId),
}

impl WeaverEvent {
    /// The job this event is about, if any.
    #[must_use]
    pub const fn job(&self) -> Option<&JobHandle> {
        match self {
            Self::JobStarted { job, .. }
            | Self::JobFinished { job, .. }
            | Self::ThreadBusy { job, .. } => Some(job),
            _ => None,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::JobFinished { .. } => "job_finished",
            Self::Finished => "finished",
            Self::Suspended => "suspended",
            Self::ThreadCreated(_) => "thread_created",
            Self::ThreadDestroyed(_) => "thread_destroyed",
            Self::ThreadBusy { .. } => "thread_busy",
            Self::ThreadSuspended(_) => "thread_suspended",
        }
    }
}

/// Destination for weaver notifications. Implementations must return immediately.
pub trait EventSink: Send + Sync {
    /// Deliver (or schedule delivery of) an event.
    fn post(&self, event: &WeaverEvent);
}

/// Sink that forwards events into an unbounded crossbeam channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<WeaverEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that consumes its events.
    #[must_use]
    pub fn new() -> (Self, Receiver<WeaverEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn post(&self, event: &WeaverEvent) {
        // A dropped receiver just means nobody listens any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Event stored by [`InMemoryEventSink`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// The event.
    pub event: WeaverEvent,
    /// Wall-clock time of posting.
    pub recorded_at_ms: u128,
}

/// Bounded in-memory event log for tests and diagnostics. Oldest entries are evicted.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<RecordedEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink keeping at most `max_events` entries.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of the stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Number of stored events matching `pred`.
    pub fn count(&self, pred: impl Fn(&WeaverEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|r| pred(&r.event)).count()
    }

    /// Drop all stored events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for InMemoryEventSink {
    fn post(&self, event: &WeaverEvent) {
        let mut events = self.events.lock();
        if self.max_events == 0 {
            return;
        }
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            event: event.clone(),
            recorded_at_ms: now_ms(),
        });
    }
}

/// Sink that logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn post(&self, event: &WeaverEvent) {
        match event {
            WeaverEvent::JobFinished {
                job,
                status,
                error: Some(error),
                ..
            } => tracing::debug!(event = event.kind(), job_id = %job.id(), ?status, %error),
            _ => match event.job() {
                Some(job) => tracing::debug!(event = event.kind(), job_id = %job.id()),
                None => tracing::debug!(event = event.kind()),
            },
        }
    }
}

/// Fan-out of one weaver's events to registered sinks and channel subscribers.
#[derive(Default)]
pub(crate) struct EventHub {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    subscribers: Mutex<Vec<Sender<WeaverEvent>>>,
}

impl EventHub {
    pub(crate) fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub(crate) fn subscribe(&self) -> Receiver<WeaverEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn post(&self, event: &WeaverEvent) {
        for sink in self.sinks.read().iter() {
            sink.post(event);
        }
        let mut subscribers = self.subscribers.lock();
        if !subscribers.is_empty() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("sinks", &self.sinks.read().len())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
