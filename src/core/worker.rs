//! Worker threads and job execution.
//!
//! A worker repeatedly reports its previous job to the weaver and receives the next one
//! (`apply_for_work`). Execution and finalisation live here as well, because composites and
//! [`JobHandle::blocking_execute`] go through the same steps without a worker thread.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::composite::Composite;
use crate::core::error::JobError;
use crate::core::events::WeaverEvent;
use crate::core::job::{JobBody, JobContext, JobHandle, JobStatus};
use crate::core::weaver::Shared;

/// Identifier of a worker thread, unique within its weaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Life cycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, not yet in its loop.
    Created,
    /// Applying for or executing jobs.
    Running,
    /// Observed shutdown and is leaving its loop.
    Exiting,
}

/// Spawn a worker thread for `shared`.
pub(crate) fn spawn_worker(shared: &Arc<Shared>, id: WorkerId) -> io::Result<JoinHandle<()>> {
    let config = shared.config();
    let name = format!("{}-{}", config.thread_name_prefix, id.0);
    let stack_size = config.thread_stack_size;
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(name)
        .stack_size(stack_size)
        .spawn(move || run(&shared, id))
}

fn run(shared: &Arc<Shared>, id: WorkerId) {
    shared.worker_started(id);
    debug!(weaver = %shared.id(), worker_id = id.0, "worker started");

    let mut previous: Option<JobHandle> = None;
    while let Some(job) = shared.apply_for_work(id, previous.take()) {
        execute(shared, &job, id);
        previous = Some(job);
    }

    shared.worker_exited(id);
    debug!(weaver = %shared.id(), worker_id = id.0, "worker exited");
}

/// Execute a job assigned to `worker`.
pub(crate) fn execute(shared: &Arc<Shared>, job: &JobHandle, worker: WorkerId) {
    if !job.begin(Some(worker)) {
        // Executed elsewhere while it sat in the queue.
        job.release_policies();
        return;
    }
    shared.post(&WeaverEvent::JobStarted {
        job: job.clone(),
        worker,
    });

    match job.body() {
        JobBody::Single(_) => {
            let ctx = JobContext::new(job, Some(worker), Some(shared));
            let (status, error) = outcome(job.run_body(&ctx));
            finalize(Some(shared), job, Some(worker), status, error);
        }
        JobBody::Composite(composite) => start_children(shared, job, composite, worker),
    }
}

fn start_children(shared: &Arc<Shared>, job: &JobHandle, composite: &Composite, worker: WorkerId) {
    let (pending, done) = composite.begin_children();
    if let Some(status) = done {
        finalize(Some(shared), job, Some(worker), status, composite_error(status));
        return;
    }
    debug!(job_id = %job.id(), children = pending.len(), "composite started");

    for (child, err) in shared.enqueue_batch(&pending) {
        if child.is_finished() {
            notify_parent(Some(shared), job, &child, child.status());
        } else if child.status() == JobStatus::New {
            warn!(job_id = %child.id(), error = %err, "child could not be queued, aborting it");
            finalize(
                Some(shared),
                &child,
                None,
                JobStatus::Aborted,
                Some(JobError::Aborted),
            );
        }
        // Children queued or running elsewhere report back when they finish.
    }
}

/// Run `job` on the calling thread.
pub(crate) fn execute_blocking(job: &JobHandle) -> JobStatus {
    if !job.begin(None) {
        return job.status();
    }
    match job.body() {
        JobBody::Single(_) => {
            let ctx = JobContext::new(job, None, None);
            let (status, error) = outcome(job.run_body(&ctx));
            finalize(None, job, None, status, error);
        }
        JobBody::Composite(composite) => {
            let (pending, done) = composite.begin_children();
            if let Some(status) = done {
                finalize(None, job, None, status, composite_error(status));
            }
            for child in pending {
                if child.status() == JobStatus::New {
                    execute_blocking(&child);
                }
            }
        }
    }
    job.status()
}

/// Record a final status: abort the rest of a failing sequence, release policies, notify,
/// resolve dependents, and report to the parent composite.
pub(crate) fn finalize(
    shared: Option<&Arc<Shared>>,
    job: &JobHandle,
    worker: Option<WorkerId>,
    status: JobStatus,
    error: Option<JobError>,
) {
    let parent = job.parent();
    if status == JobStatus::Failed {
        if let Some(parent) = &parent {
            if parent.composite().is_some_and(Composite::stops_on_failure) {
                abort_pending_children(shared, parent);
            }
        }
    }

    match (&status, &error) {
        (JobStatus::Failed, Some(err)) => warn!(job_id = %job.id(), error = %err, "job failed"),
        _ => debug!(job_id = %job.id(), ?status, "job finished"),
    }

    job.set_outcome(status, error.clone());
    job.release_policies();
    if let Some(shared) = shared {
        shared.post(&WeaverEvent::JobFinished {
            job: job.clone(),
            worker,
            status,
            error,
        });
    }
    job.resolve_dependents();

    if let Some(parent) = parent {
        notify_parent(shared, &parent, job, status);
    }
}

fn notify_parent(
    shared: Option<&Arc<Shared>>,
    parent: &JobHandle,
    child: &JobHandle,
    status: JobStatus,
) {
    let Some(composite) = parent.composite() else {
        return;
    };
    if let Some(outcome) = composite.child_done(child.id(), status) {
        let worker = parent.worker();
        finalize(shared, parent, worker, outcome, composite_error(outcome));
    }
}

fn abort_pending_children(shared: Option<&Arc<Shared>>, parent: &JobHandle) {
    let Some(composite) = parent.composite() else {
        return;
    };
    let children = composite.children();
    let pending = match shared {
        Some(shared) => shared.take_queued(&children),
        None => children
            .into_iter()
            .filter(|c| c.status() == JobStatus::New)
            .collect(),
    };
    for child in &pending {
        debug!(job_id = %child.id(), parent = %parent.id(), "aborting child after failure");
        finalize(shared, child, None, JobStatus::Aborted, Some(JobError::Aborted));
    }
}

fn outcome(result: Result<(), JobError>) -> (JobStatus, Option<JobError>) {
    match result {
        Ok(()) => (JobStatus::Success, None),
        Err(err) => (JobStatus::Failed, Some(err)),
    }
}

fn composite_error(status: JobStatus) -> Option<JobError> {
    (status == JobStatus::Failed).then(|| JobError::failed("a child job did not succeed"))
}
