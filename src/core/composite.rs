//! Composite jobs: collections (children in any order) and sequences (children in order).
//!
//! A composite takes one entry in the weaver queue. When a worker picks it up, its children are
//! enqueued into the same weaver; the composite finishes once every child reported back.

use std::collections::HashSet;
use std::ops::Deref;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::job::{JobBody, JobHandle, JobStatus};
use crate::util::serde::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompositeKind {
    Collection,
    Sequence,
}

struct CompositeState {
    children: Vec<JobHandle>,
    started: bool,
    reported: HashSet<JobId>,
    failed: bool,
    stop_on_failure: bool,
}

pub(crate) struct Composite {
    kind: CompositeKind,
    state: Mutex<CompositeState>,
}

impl Composite {
    fn new(kind: CompositeKind) -> Self {
        Self {
            kind,
            state: Mutex::new(CompositeState {
                children: Vec::new(),
                started: false,
                reported: HashSet::new(),
                failed: false,
                stop_on_failure: true,
            }),
        }
    }

    pub(crate) fn stops_on_failure(&self) -> bool {
        self.kind == CompositeKind::Sequence && self.state.lock().stop_on_failure
    }

    pub(crate) fn children(&self) -> Vec<JobHandle> {
        self.state.lock().children.clone()
    }

    /// Start counting child reports. Children that finished before the composite started
    /// count right away. Returns the children still to run and, if nothing is left to wait
    /// for, the composite's final status.
    pub(crate) fn begin_children(&self) -> (Vec<JobHandle>, Option<JobStatus>) {
        let mut state = self.state.lock();
        state.started = true;
        let mut pending = Vec::new();
        for child in state.children.clone() {
            let status = child.status();
            if status.is_finished() {
                state.reported.insert(child.id());
                state.failed |= status != JobStatus::Success;
            } else {
                pending.push(child);
            }
        }
        let outcome = Self::outcome(&state);
        (pending, outcome)
    }

    /// Record that `child` finished. Returns the composite's final status once the last
    /// child reported. Duplicate reports and reports before the start are ignored.
    pub(crate) fn child_done(&self, child: JobId, status: JobStatus) -> Option<JobStatus> {
        let mut state = self.state.lock();
        if !state.started || !state.reported.insert(child) {
            return None;
        }
        state.failed |= status != JobStatus::Success;
        Self::outcome(&state)
    }

    fn outcome(state: &CompositeState) -> Option<JobStatus> {
        (state.reported.len() == state.children.len()).then_some(if state.failed {
            JobStatus::Failed
        } else {
            JobStatus::Success
        })
    }

    fn push(&self, child: JobHandle) -> Option<JobHandle> {
        let mut state = self.state.lock();
        let previous = state.children.last().cloned();
        state.children.push(child);
        previous
    }

    fn set_stop_on_failure(&self, stop: bool) {
        self.state.lock().stop_on_failure = stop;
    }
}

fn add_child(handle: &JobHandle, child: &JobHandle) -> Option<Option<JobHandle>> {
    let Some(composite) = handle.composite() else {
        return None;
    };
    if handle.status() != JobStatus::New {
        warn!(
            job_id = %handle.id(),
            child = %child.id(),
            "composite already submitted, child ignored"
        );
        return None;
    }
    if child.ptr_eq(handle) {
        warn!(job_id = %handle.id(), "composite cannot contain itself");
        return None;
    }
    child.set_parent(handle);
    Some(composite.push(child.clone()))
}

/// A group of jobs executed in any order. Finishes when all children finished.
#[derive(Clone, Debug)]
pub struct JobCollection(JobHandle);

impl JobCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self(JobHandle::with_body(JobBody::Composite(Composite::new(
            CompositeKind::Collection,
        ))))
    }

    /// Add a child. Ignored (with a warning) once the collection was enqueued.
    pub fn add(&self, child: &JobHandle) -> &Self {
        add_child(&self.0, child);
        self
    }

    /// Children in insertion order.
    #[must_use]
    pub fn children(&self) -> Vec<JobHandle> {
        self.0.composite().map(Composite::children).unwrap_or_default()
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children().len()
    }

    /// `true` without children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handle to enqueue or depend on.
    #[must_use]
    pub const fn handle(&self) -> &JobHandle {
        &self.0
    }
}

impl Default for JobCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for JobCollection {
    type Target = JobHandle;

    fn deref(&self) -> &JobHandle {
        &self.0
    }
}

impl From<JobCollection> for JobHandle {
    fn from(collection: JobCollection) -> Self {
        collection.0
    }
}

/// Jobs executed strictly one after another.
///
/// Each appended child depends on the previous one. By default a failing child aborts the
/// children that have not started yet, and the sequence finishes as [`JobStatus::Failed`].
#[derive(Clone, Debug)]
pub struct JobSequence(JobHandle);

impl JobSequence {
    /// Create an empty sequence that stops on the first failure.
    #[must_use]
    pub fn new() -> Self {
        Self(JobHandle::with_body(JobBody::Composite(Composite::new(
            CompositeKind::Sequence,
        ))))
    }

    /// Choose whether a failing child aborts the rest.
    #[must_use]
    pub fn with_stop_on_failure(self, stop: bool) -> Self {
        if let Some(composite) = self.0.composite() {
            composite.set_stop_on_failure(stop);
        }
        self
    }

    /// Append a child that runs after the current last child.
    pub fn append(&self, child: &JobHandle) -> &Self {
        if let Some(Some(previous)) = add_child(&self.0, child) {
            child.add_dependency(&previous);
        }
        self
    }

    /// Children in execution order.
    #[must_use]
    pub fn children(&self) -> Vec<JobHandle> {
        self.0.composite().map(Composite::children).unwrap_or_default()
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children().len()
    }

    /// `true` without children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handle to enqueue or depend on.
    #[must_use]
    pub const fn handle(&self) -> &JobHandle {
        &self.0
    }
}

impl Default for JobSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for JobSequence {
    type Target = JobHandle;

    fn deref(&self) -> &JobHandle {
        &self.0
    }
}

impl From<JobSequence> for JobHandle {
    fn from(sequence: JobSequence) -> Self {
        sequence.0
    }
}
