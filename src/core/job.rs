//! Jobs: units of schedulable work and the dependency graph between them.
//!
//! A [`JobHandle`] is a shared reference to a job. Dependency edges are kept on both ends
//! (`dependencies` on the waiting job, `dependents` on the job waited for) and both ends are
//! weak, so the graph never owns a job. A dependency that is dropped before it ran counts as
//! resolved, which keeps its dependents from starving.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::core::composite::Composite;
use crate::core::error::{JobError, WeaverError};
use crate::core::policy::QueuePolicy;
use crate::core::weaver::Shared;
use crate::core::worker::{self, WorkerId};
use crate::util::serde::{JobId, Priority};

/// The body of a job.
///
/// `run` is called at most once, on a worker thread. Returning an error or panicking marks
/// the job [`JobStatus::Failed`]; dependents are unblocked either way.
pub trait Job: Send + 'static {
    /// Do the work.
    ///
    /// # Errors
    ///
    /// Any [`JobError`] is reported through the job-finished notification.
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError>;
}

/// A job built from a closure.
pub struct FnJob<F>(F);

impl<F> FnJob<F>
where
    F: FnMut(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
{
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Job for FnJob<F>
where
    F: FnMut(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
{
    fn run(&mut self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        (self.0)(ctx)
    }
}

/// Shorthand for [`JobHandle::from_fn`].
pub fn job_fn<F>(f: F) -> JobHandle
where
    F: FnMut(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
{
    JobHandle::from_fn(f)
}

/// Where a job is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not queued.
    New,
    /// Waiting in a weaver queue.
    Queued,
    /// Being executed (for composites: children are being executed).
    Running,
    /// Ran to completion.
    Success,
    /// Body returned an error or panicked, or a child of a composite failed.
    Failed,
    /// Removed before it could run.
    Aborted,
}

impl JobStatus {
    /// `true` for the three final states.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted)
    }
}

/// What a running job can see of its surroundings.
pub struct JobContext<'a> {
    job: &'a JobHandle,
    worker: Option<WorkerId>,
    weaver: Option<&'a Arc<Shared>>,
}

impl<'a> JobContext<'a> {
    pub(crate) const fn new(
        job: &'a JobHandle,
        worker: Option<WorkerId>,
        weaver: Option<&'a Arc<Shared>>,
    ) -> Self {
        Self {
            job,
            worker,
            weaver,
        }
    }

    /// The job being executed.
    #[must_use]
    pub const fn job(&self) -> &JobHandle {
        self.job
    }

    /// Executing worker; `None` for [`JobHandle::blocking_execute`].
    #[must_use]
    pub const fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    /// Submit a follow-up job to the weaver executing this one.
    ///
    /// # Errors
    ///
    /// [`WeaverError::NotAttached`] when the job runs outside a weaver, otherwise whatever
    /// [`crate::core::Weaver::enqueue`] reports.
    pub fn enqueue(&self, job: &JobHandle) -> Result<(), WeaverError> {
        match self.weaver {
            Some(shared) => shared.enqueue(job),
            None => Err(WeaverError::NotAttached),
        }
    }
}

/// One end of a dependency edge.
#[derive(Clone)]
struct Link {
    id: JobId,
    job: Weak<JobCore>,
    done: Arc<AtomicBool>,
}

impl Link {
    fn to(core: &Arc<JobCore>) -> Self {
        Self {
            id: core.id,
            job: Arc::downgrade(core),
            done: Arc::clone(&core.done),
        }
    }
}

pub(crate) enum JobBody {
    Single(Mutex<Box<dyn Job>>),
    Composite(Composite),
}

struct JobState {
    status: JobStatus,
    priority: Priority,
    worker: Option<WorkerId>,
    error: Option<JobError>,
    dependencies: Vec<Link>,
    dependents: Vec<Link>,
    policies: Vec<Arc<dyn QueuePolicy>>,
    holds_policies: bool,
    parent: Option<Weak<JobCore>>,
    weaver: Option<Weak<Shared>>,
}

pub(crate) struct JobCore {
    id: JobId,
    body: JobBody,
    /// Set together with a final status, or when the job is dropped.
    done: Arc<AtomicBool>,
    state: Mutex<JobState>,
}

/// Shared reference to a job. Cloning is cheap; identity is [`JobHandle::id`].
#[derive(Clone)]
pub struct JobHandle(Arc<JobCore>);

impl JobHandle {
    /// Wrap a job body.
    pub fn new<J: Job>(job: J) -> Self {
        Self::with_body(JobBody::Single(Mutex::new(Box::new(job))))
    }

    /// Wrap a closure as a job.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
    {
        Self::new(FnJob::new(f))
    }

    pub(crate) fn with_body(body: JobBody) -> Self {
        Self(Arc::new(JobCore {
            id: JobId::next(),
            body,
            done: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(JobState {
                status: JobStatus::New,
                priority: Priority::Normal,
                worker: None,
                error: None,
                dependencies: Vec::new(),
                dependents: Vec::new(),
                policies: Vec::new(),
                holds_policies: false,
                parent: None,
                weaver: None,
            }),
        }))
    }

    /// Identifier, stable for the job's lifetime.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.0.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.0.state.lock().status
    }

    /// `true` once the job reached a final status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Failure reason of a failed or aborted job.
    #[must_use]
    pub fn error(&self) -> Option<JobError> {
        self.0.state.lock().error.clone()
    }

    /// Worker currently executing the job.
    #[must_use]
    pub fn worker(&self) -> Option<WorkerId> {
        self.0.state.lock().worker
    }

    /// Queue ordering key.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.0.state.lock().priority
    }

    /// Change the ordering key. Affects only later enqueues.
    pub fn set_priority(&self, priority: Priority) {
        self.0.state.lock().priority = priority;
    }

    /// Builder-style [`JobHandle::set_priority`].
    #[must_use]
    pub fn with_priority(self, priority: Priority) -> Self {
        self.set_priority(priority);
        self
    }

    /// `true` for collections and sequences.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self.0.body, JobBody::Composite(_))
    }

    /// Make this job wait until `dependency` finished.
    ///
    /// Cycles are not detected here; a cycle starves every job on it. Use
    /// [`JobHandle::add_dependency_checked`] to reject them.
    pub fn add_dependency(&self, dependency: &Self) {
        {
            let mut state = self.0.state.lock();
            if state.dependencies.iter().any(|l| l.id == dependency.id()) {
                return;
            }
            state.dependencies.push(Link::to(&dependency.0));
        }
        {
            // A finished dependency never resolves again, so it keeps no back link.
            let mut state = dependency.0.state.lock();
            if !dependency.0.done.load(Ordering::Acquire) {
                state.dependents.push(Link::to(&self.0));
            }
        }
        trace!(job_id = %self.id(), dependency = %dependency.id(), "dependency added");
    }

    /// Like [`JobHandle::add_dependency`], but refuses edges that would close a cycle.
    ///
    /// # Errors
    ///
    /// [`WeaverError::DependencyCycle`] if `dependency` is this job or already waits for it.
    pub fn add_dependency_checked(&self, dependency: &Self) -> Result<(), WeaverError> {
        if dependency.id() == self.id() || dependency.waits_for(self.id()) {
            return Err(WeaverError::DependencyCycle {
                job: self.id(),
                dependency: dependency.id(),
            });
        }
        self.add_dependency(dependency);
        Ok(())
    }

    /// Remove an edge added with [`JobHandle::add_dependency`]. Returns whether it existed.
    pub fn remove_dependency(&self, dependency: &Self) -> bool {
        let removed = self.0.unlink_dependency(dependency.id());
        dependency.0.unlink_dependent(self.id());
        removed
    }

    /// `true` while any dependency has not finished.
    #[must_use]
    pub fn has_unresolved_dependencies(&self) -> bool {
        self.0
            .state
            .lock()
            .dependencies
            .iter()
            .any(|l| !l.done.load(Ordering::Acquire))
    }

    /// Jobs this job waits for (still alive).
    #[must_use]
    pub fn dependencies(&self) -> Vec<Self> {
        let links = self.0.state.lock().dependencies.clone();
        links.iter().filter_map(|l| l.job.upgrade().map(Self)).collect()
    }

    /// Jobs waiting for this job (still alive).
    #[must_use]
    pub fn dependents(&self) -> Vec<Self> {
        let links = self.0.state.lock().dependents.clone();
        links.iter().filter_map(|l| l.job.upgrade().map(Self)).collect()
    }

    /// Attach an admission policy. All policies must agree before the job is assigned.
    pub fn assign_queue_policy(&self, policy: Arc<dyn QueuePolicy>) {
        let mut state = self.0.state.lock();
        if !state.policies.iter().any(|p| Arc::ptr_eq(p, &policy)) {
            state.policies.push(policy);
        }
    }

    /// Detach a policy previously attached.
    pub fn remove_queue_policy(&self, policy: &Arc<dyn QueuePolicy>) {
        self.0
            .state
            .lock()
            .policies
            .retain(|p| !Arc::ptr_eq(p, policy));
    }

    /// Attached policies.
    #[must_use]
    pub fn queue_policies(&self) -> Vec<Arc<dyn QueuePolicy>> {
        self.0.state.lock().policies.clone()
    }

    /// Execute the job on the calling thread, without a weaver.
    ///
    /// Composites execute their children one after another in insertion order. Returns the
    /// final status; a job that was not `New` is left untouched.
    pub fn blocking_execute(&self) -> JobStatus {
        worker::execute_blocking(self)
    }

    // ---- crate-internal life cycle ------------------------------------------------------

    pub(crate) fn body(&self) -> &JobBody {
        &self.0.body
    }

    pub(crate) fn composite(&self) -> Option<&Composite> {
        match &self.0.body {
            JobBody::Composite(c) => Some(c),
            JobBody::Single(_) => None,
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn parent(&self) -> Option<Self> {
        self.0
            .state
            .lock()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Self)
    }

    pub(crate) fn set_parent(&self, parent: &Self) {
        self.0.state.lock().parent = Some(Arc::downgrade(&parent.0));
    }

    /// `New` → `Queued` in `weaver`.
    pub(crate) fn mark_queued(&self, weaver: &Arc<Shared>) -> Result<(), WeaverError> {
        let mut state = self.0.state.lock();
        match state.status {
            JobStatus::New => {
                state.status = JobStatus::Queued;
                state.weaver = Some(Arc::downgrade(weaver));
                Ok(())
            }
            JobStatus::Queued | JobStatus::Running => Err(WeaverError::AlreadyQueued(self.id())),
            JobStatus::Success | JobStatus::Failed | JobStatus::Aborted => {
                Err(WeaverError::AlreadyExecuted(self.id()))
            }
        }
    }

    /// `Queued` → `New` after removal from a queue.
    pub(crate) fn mark_dequeued(&self) {
        let mut state = self.0.state.lock();
        if state.status == JobStatus::Queued {
            state.status = JobStatus::New;
            state.weaver = None;
        }
    }

    /// Ask every policy; on refusal the ones that agreed are released again.
    pub(crate) fn acquire_policies(&self) -> bool {
        let policies = {
            let state = self.0.state.lock();
            if state.holds_policies || state.policies.is_empty() {
                return true;
            }
            state.policies.clone()
        };
        for (idx, policy) in policies.iter().enumerate() {
            if !policy.can_run(self) {
                for granted in &policies[..idx] {
                    granted.release(self);
                }
                return false;
            }
        }
        self.0.state.lock().holds_policies = true;
        true
    }

    pub(crate) fn release_policies(&self) {
        let policies = {
            let mut state = self.0.state.lock();
            if !std::mem::take(&mut state.holds_policies) {
                return;
            }
            state.policies.clone()
        };
        for policy in &policies {
            policy.release(self);
        }
    }

    /// Move to `Running`. Workers start `Queued` jobs, detached execution only `New` ones.
    /// Returns `false` if the job cannot start.
    pub(crate) fn begin(&self, worker: Option<WorkerId>) -> bool {
        let mut state = self.0.state.lock();
        let startable = match state.status {
            JobStatus::New => true,
            JobStatus::Queued => worker.is_some(),
            _ => false,
        };
        if startable {
            state.status = JobStatus::Running;
            state.worker = worker;
        }
        startable
    }

    /// Run a single job's body, containing panics.
    pub(crate) fn run_body(&self, ctx: &JobContext<'_>) -> Result<(), JobError> {
        let JobBody::Single(body) = &self.0.body else {
            return Ok(());
        };
        let mut body = body.lock();
        match catch_unwind(AssertUnwindSafe(|| body.run(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Record the final status. Dependents stay blocked until [`Self::resolve_dependents`].
    pub(crate) fn set_outcome(&self, status: JobStatus, error: Option<JobError>) {
        let mut state = self.0.state.lock();
        state.status = status;
        state.error = error;
        state.worker = None;
    }

    /// Mark the job done for its dependents and wake the weavers they wait in.
    pub(crate) fn resolve_dependents(&self) {
        let dependents = {
            let mut state = self.0.state.lock();
            self.0.done.store(true, Ordering::Release);
            std::mem::take(&mut state.dependents)
        };
        for link in dependents {
            if let Some(dependent) = link.job.upgrade() {
                dependent.unlink_dependency(self.id());
            }
        }
    }

    /// Depth-first search through dependencies for `target`.
    fn waits_for(&self, target: JobId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(job) = stack.pop() {
            for dep in job.dependencies() {
                if dep.id() == target {
                    return true;
                }
                if seen.insert(dep.id()) {
                    stack.push(dep);
                }
            }
        }
        false
    }
}

impl JobCore {
    fn unlink_dependency(&self, id: JobId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.dependencies.len();
            state.dependencies.retain(|l| l.id != id);
            before != state.dependencies.len()
        };
        if removed {
            self.wake_weaver();
        }
        removed
    }

    fn unlink_dependent(&self, id: JobId) {
        self.state.lock().dependents.retain(|l| l.id != id);
    }

    fn wake_weaver(&self) {
        let weaver = self.state.lock().weaver.as_ref().and_then(Weak::upgrade);
        if let Some(weaver) = weaver {
            weaver.wake_workers();
        }
    }
}

impl Drop for JobCore {
    fn drop(&mut self) {
        let id = self.id;
        self.done.store(true, Ordering::Release);
        let state = self.state.get_mut();
        if !state.status.is_finished() && !state.dependents.is_empty() {
            warn!(job_id = %id, "job dropped before it finished, releasing its dependents");
        }
        for link in state.dependents.drain(..) {
            if let Some(dependent) = link.job.upgrade() {
                dependent.unlink_dependency(id);
            }
        }
        for link in state.dependencies.drain(..) {
            if let Some(dependency) = link.job.upgrade() {
                dependency.unlink_dependent(id);
            }
        }
        for policy in state.policies.drain(..) {
            policy.destructed(id);
        }
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for JobHandle {}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("composite", &self.is_composite())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
