//! The weaver: a pool of worker threads and the queue of jobs waiting for them.
//!
//! All scheduler state lives behind one mutex with two condition variables. Workers sleep on
//! `job_available` inside [`Shared::apply_for_work`]; callers of [`Weaver::finish`] sleep on
//! `job_finished`. A job handle taken out of the queue is always dropped after the lock is
//! released, since dropping the last handle of a job wakes the weaver.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WeaverConfig;
use crate::core::error::{JobError, WeaverError};
use crate::core::events::{EventHub, EventSink, WeaverEvent};
use crate::core::job::{JobHandle, JobStatus};
use crate::core::worker::{self, WorkerId, WorkerState};

/// Externally observable state of a weaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaverState {
    /// Nothing queued, nothing running.
    Idle,
    /// Jobs are queued or running.
    Running,
    /// Suspension requested, jobs still running.
    Suspending,
    /// Suspended and no job running.
    Suspended,
    /// Shut down; accepts no work.
    ShuttingDown,
}

struct WeaverInner {
    queue: Vec<JobHandle>,
    active: usize,
    /// Dequeue operations between taking jobs out of the queue and settling them.
    settling: usize,
    suspended: bool,
    shutting_down: bool,
    idle: usize,
    starting: usize,
    workers: BTreeMap<WorkerId, WorkerState>,
    /// Events raised under the lock, posted once it is released.
    outbox: Vec<WeaverEvent>,
}

impl WeaverInner {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active == 0 && self.settling == 0
    }

    fn has_eligible_job(&self) -> bool {
        self.queue.iter().any(|job| !job.has_unresolved_dependencies())
    }
}

pub(crate) struct Shared {
    id: Uuid,
    config: WeaverConfig,
    state: Mutex<WeaverInner>,
    job_available: Condvar,
    job_finished: Condvar,
    events: EventHub,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
}

impl Shared {
    pub(crate) const fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) const fn config(&self) -> &WeaverConfig {
        &self.config
    }

    pub(crate) fn post(&self, event: &WeaverEvent) {
        self.events.post(event);
    }

    /// Release the lock, then post what was raised while holding it. Sinks may drop the last
    /// handle of a job, and dropping a job can take the lock again.
    fn unlock_and_post(&self, mut state: MutexGuard<'_, WeaverInner>) {
        let outbox = std::mem::take(&mut state.outbox);
        drop(state);
        for event in outbox {
            self.events.post(&event);
        }
    }

    /// Post what was raised under the lock, unlocking only for the duration.
    fn post_unlocked(&self, state: &mut MutexGuard<'_, WeaverInner>) {
        let outbox = std::mem::take(&mut state.outbox);
        if outbox.is_empty() {
            return;
        }
        MutexGuard::unlocked(state, || {
            for event in outbox {
                self.events.post(&event);
            }
        });
    }

    /// Wake every sleeping worker so it re-scans the queue.
    pub(crate) fn wake_workers(&self) {
        // Taking the lock orders this wake-up after any scan in progress.
        drop(self.state.lock());
        self.job_available.notify_all();
    }

    pub(crate) fn enqueue(self: &Arc<Self>, job: &JobHandle) -> Result<(), WeaverError> {
        match self.enqueue_batch(std::slice::from_ref(job)).pop() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Queue `jobs` under one lock. Returns the jobs that were refused.
    pub(crate) fn enqueue_batch(
        self: &Arc<Self>,
        jobs: &[JobHandle],
    ) -> Vec<(JobHandle, WeaverError)> {
        let mut refused = Vec::new();
        let mut state = self.state.lock();
        if state.shutting_down {
            return jobs
                .iter()
                .map(|job| (job.clone(), WeaverError::ShuttingDown))
                .collect();
        }

        let mut accepted = Vec::with_capacity(jobs.len());
        for job in jobs {
            if let Err(err) = job.mark_queued(self) {
                refused.push((job.clone(), err));
                continue;
            }
            let priority = job.priority();
            let pos = state
                .queue
                .iter()
                .position(|queued| queued.priority() < priority)
                .unwrap_or(state.queue.len());
            state.queue.insert(pos, job.clone());
            accepted.push(job.clone());
            debug!(
                weaver = %self.id,
                job_id = %job.id(),
                ?priority,
                queue_length = state.queue.len(),
                "job enqueued"
            );
        }

        if let Err(err) = self.adjust_inventory(&mut state) {
            if state.workers.is_empty() {
                state
                    .queue
                    .retain(|queued| !accepted.iter().any(|job| job.ptr_eq(queued)));
                self.unlock_and_post(state);
                for job in accepted {
                    job.mark_dequeued();
                    refused.push((job, err.clone()));
                }
                return refused;
            }
        }
        self.unlock_and_post(state);

        self.job_available.notify_all();
        refused
    }

    /// Spawn workers while queued jobs outnumber the workers free to take them.
    fn adjust_inventory(self: &Arc<Self>, state: &mut WeaverInner) -> Result<(), WeaverError> {
        while state.workers.len() < self.config.max_threads
            && state.idle + state.starting < state.queue.len()
        {
            self.spawn_worker(state)?;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut WeaverInner) -> Result<WorkerId, WeaverError> {
        let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let handle = worker::spawn_worker(self, id).map_err(|e| {
            error!(weaver = %self.id, worker_id = id.0, error = %e, "failed to spawn worker");
            WeaverError::ThreadSpawn(e.to_string())
        })?;
        state.workers.insert(id, WorkerState::Created);
        state.starting += 1;
        self.handles.lock().push(handle);
        debug!(
            weaver = %self.id,
            worker_id = id.0,
            inventory = state.workers.len(),
            "worker spawned"
        );
        state.outbox.push(WeaverEvent::ThreadCreated(id));
        Ok(id)
    }

    pub(crate) fn worker_started(&self, id: WorkerId) {
        let mut state = self.state.lock();
        state.starting = state.starting.saturating_sub(1);
        state.workers.insert(id, WorkerState::Running);
    }

    pub(crate) fn worker_exited(&self, id: WorkerId) {
        self.state.lock().workers.remove(&id);
        self.events.post(&WeaverEvent::ThreadDestroyed(id));
    }

    /// Report `previous` as done and block until the next job is available.
    ///
    /// Returns `None` once the weaver shuts down.
    pub(crate) fn apply_for_work(
        &self,
        worker: WorkerId,
        previous: Option<JobHandle>,
    ) -> Option<JobHandle> {
        let had_previous = previous.is_some();
        drop(previous);

        let mut state = self.state.lock();
        if had_previous {
            state.active = state.active.saturating_sub(1);
            if state.active == 0 {
                if !state.has_eligible_job() {
                    debug!(weaver = %self.id, "queue finished");
                    state.outbox.push(WeaverEvent::Finished);
                }
                if state.suspended {
                    info!(weaver = %self.id, "weaver suspended");
                    state.outbox.push(WeaverEvent::Suspended);
                }
            }
            // Counted as settling so `finish` returns only after the notifications went out.
            state.settling += 1;
            self.post_unlocked(&mut state);
            state.settling -= 1;
            self.job_finished.notify_all();
            // A finished job may have released a policy slot others wait for.
            self.job_available.notify_all();
        }

        let mut announced = false;
        loop {
            if state.shutting_down {
                state.workers.insert(worker, WorkerState::Exiting);
                self.unlock_and_post(state);
                return None;
            }
            if !state.suspended {
                if let Some(job) = Self::take_next(&mut state) {
                    self.unlock_and_post(state);
                    debug!(
                        weaver = %self.id,
                        worker_id = worker.0,
                        job_id = %job.id(),
                        "job assigned"
                    );
                    self.events.post(&WeaverEvent::ThreadBusy {
                        worker,
                        job: job.clone(),
                    });
                    return Some(job);
                }
            }
            if !announced {
                announced = true;
                state.outbox.push(WeaverEvent::ThreadSuspended(worker));
                self.post_unlocked(&mut state);
                // The queue may have changed while unlocked.
                continue;
            }
            state.idle += 1;
            self.job_available.wait(&mut state);
            state.idle -= 1;
        }
    }

    /// First queued job whose dependencies resolved and whose policies all admit it.
    fn take_next(state: &mut WeaverInner) -> Option<JobHandle> {
        let pos = state
            .queue
            .iter()
            .position(|job| !job.has_unresolved_dependencies() && job.acquire_policies())?;
        state.active += 1;
        Some(state.queue.remove(pos))
    }

    /// Remove those of `jobs` that are still queued.
    pub(crate) fn take_queued(&self, jobs: &[JobHandle]) -> Vec<JobHandle> {
        let mut state = self.state.lock();
        let (taken, kept) = std::mem::take(&mut state.queue)
            .into_iter()
            .partition(|queued| jobs.iter().any(|job| job.ptr_eq(queued)));
        state.queue = kept;
        taken
    }

    fn dequeue(self: &Arc<Self>, job: &JobHandle) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let pos = state.queue.iter().position(|queued| queued.ptr_eq(job));
            pos.map(|pos| {
                state.settling += 1;
                state.queue.remove(pos)
            })
        };
        if let Some(removed) = removed {
            debug!(weaver = %self.id, job_id = %removed.id(), "job dequeued");
            self.settle(&removed);
            drop(removed);
            self.settled();
            return true;
        }

        let Some(composite) = job.composite() else {
            return false;
        };
        if job.status() != JobStatus::Running {
            return false;
        }
        self.state.lock().settling += 1;
        let children = self.take_queued(&composite.children());
        for child in &children {
            debug!(weaver = %self.id, job_id = %child.id(), parent = %job.id(), "child dequeued");
            worker::finalize(
                Some(self),
                child,
                None,
                JobStatus::Aborted,
                Some(JobError::Aborted),
            );
        }
        let any = !children.is_empty();
        drop(children);
        self.settled();
        any
    }

    fn dequeue_all(self: &Arc<Self>) {
        let removed = {
            let mut state = self.state.lock();
            state.settling += 1;
            std::mem::take(&mut state.queue)
        };
        debug!(weaver = %self.id, count = removed.len(), "queue cleared");
        for job in &removed {
            self.settle(job);
        }
        drop(removed);
        self.settled();
    }

    /// Children of a running composite cannot go back to `New`; they are aborted instead.
    fn settle(self: &Arc<Self>, job: &JobHandle) {
        match job.parent() {
            Some(parent) if parent.status() == JobStatus::Running => {
                worker::finalize(
                    Some(self),
                    job,
                    None,
                    JobStatus::Aborted,
                    Some(JobError::Aborted),
                );
            }
            _ => job.mark_dequeued(),
        }
    }

    fn settled(&self) {
        let mut state = self.state.lock();
        state.settling = state.settling.saturating_sub(1);
        drop(state);
        self.job_finished.notify_all();
    }

    pub(crate) fn finish(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.shutting_down || state.is_idle() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.job_finished.wait_until(&mut state, deadline).timed_out() {
                        return state.is_idle();
                    }
                }
                None => self.job_finished.wait(&mut state),
            }
        }
    }

    fn suspend(&self) {
        let mut state = self.state.lock();
        if state.suspended || state.shutting_down {
            return;
        }
        state.suspended = true;
        info!(weaver = %self.id, active = state.active, "suspend requested");
        if state.active == 0 {
            state.outbox.push(WeaverEvent::Suspended);
        }
        self.unlock_and_post(state);
    }

    fn resume(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if !state.suspended {
            return;
        }
        state.suspended = false;
        info!(weaver = %self.id, queue_length = state.queue.len(), "weaver resumed");
        if let Err(err) = self.adjust_inventory(&mut state) {
            warn!(weaver = %self.id, error = %err, "could not grow inventory on resume");
        }
        self.unlock_and_post(state);
        self.job_available.notify_all();
    }

    fn state(&self) -> WeaverState {
        let state = self.state.lock();
        if state.shutting_down {
            WeaverState::ShuttingDown
        } else if state.suspended {
            if state.active > 0 {
                WeaverState::Suspending
            } else {
                WeaverState::Suspended
            }
        } else if state.is_idle() {
            WeaverState::Idle
        } else {
            WeaverState::Running
        }
    }

    fn shut_down(&self) {
        let queued = {
            let mut state = self.state.lock();
            if !state.shutting_down {
                state.shutting_down = true;
                info!(
                    weaver = %self.id,
                    queue_length = state.queue.len(),
                    active = state.active,
                    "weaver shutting down"
                );
            }
            std::mem::take(&mut state.queue)
        };
        self.job_available.notify_all();
        self.job_finished.notify_all();
        for job in &queued {
            job.mark_dequeued();
        }
        drop(queued);

        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        let count = handles.len();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(weaver = %self.id, "worker thread panicked");
            }
        }
        if count > 0 {
            info!(weaver = %self.id, workers = count, "weaver shut down");
        }
    }
}

/// A pool of worker threads executing [`JobHandle`]s.
///
/// Jobs are assigned in queue order to the first job whose dependencies finished and whose
/// queue policies admit it. The queue is ordered by priority; jobs of equal priority keep
/// their enqueue order, which is a scan order and not a FIFO guarantee.
///
/// Dropping the weaver shuts it down: queued jobs go back to [`JobStatus::New`], running jobs
/// finish, and all workers are joined.
pub struct Weaver {
    shared: Arc<Shared>,
}

impl Weaver {
    /// Create a weaver and spawn `config.min_threads` workers.
    ///
    /// # Errors
    ///
    /// [`WeaverError::InvalidConfig`] if the configuration does not validate,
    /// [`WeaverError::ThreadSpawn`] if an initial worker cannot be started.
    pub fn new(config: WeaverConfig) -> Result<Self, WeaverError> {
        Self::with_sinks(config, Vec::new())
    }

    /// Like [`Weaver::new`], with sinks registered before the first worker is spawned.
    pub(crate) fn with_sinks(
        config: WeaverConfig,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<Self, WeaverError> {
        config.validate().map_err(WeaverError::InvalidConfig)?;
        let events = EventHub::default();
        for sink in sinks {
            events.add_sink(sink);
        }
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            state: Mutex::new(WeaverInner {
                queue: Vec::new(),
                active: 0,
                settling: 0,
                suspended: false,
                shutting_down: false,
                idle: 0,
                starting: 0,
                workers: BTreeMap::new(),
                outbox: Vec::new(),
            }),
            config,
            job_available: Condvar::new(),
            job_finished: Condvar::new(),
            events,
            handles: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
        });
        let weaver = Self { shared };

        {
            let shared = &weaver.shared;
            let mut state = shared.state.lock();
            for _ in 0..shared.config.min_threads {
                shared.spawn_worker(&mut state)?;
            }
            shared.unlock_and_post(state);
        }

        info!(
            weaver = %weaver.shared.id,
            min_threads = weaver.shared.config.min_threads,
            max_threads = weaver.shared.config.max_threads,
            "weaver initialized"
        );
        Ok(weaver)
    }

    /// Create a weaver with [`WeaverConfig::default`].
    ///
    /// # Errors
    ///
    /// See [`Weaver::new`].
    pub fn with_default_config() -> Result<Self, WeaverError> {
        Self::new(WeaverConfig::default())
    }

    /// Instance identifier, used in log fields.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Configuration the weaver was built with.
    #[must_use]
    pub fn config(&self) -> &WeaverConfig {
        &self.shared.config
    }

    pub(crate) const fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Queue a job and wake the workers. Spawns a worker if none is free and the inventory is
    /// below `max_threads`.
    ///
    /// # Errors
    ///
    /// [`WeaverError::ShuttingDown`], [`WeaverError::AlreadyQueued`] or
    /// [`WeaverError::AlreadyExecuted`]; [`WeaverError::ThreadSpawn`] if the weaver has no
    /// worker and cannot start one.
    pub fn enqueue(&self, job: &JobHandle) -> Result<(), WeaverError> {
        self.shared.enqueue(job)
    }

    /// Queue several jobs at once. Every acceptable job is queued; the first refusal is
    /// returned.
    ///
    /// # Errors
    ///
    /// See [`Weaver::enqueue`].
    pub fn enqueue_all(&self, jobs: &[JobHandle]) -> Result<(), WeaverError> {
        match self.shared.enqueue_batch(jobs).into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove a job that has not been assigned yet. The job returns to
    /// [`JobStatus::New`], unless it is a child of a running composite, in which case it is
    /// aborted. For a running composite, its queued children are aborted.
    ///
    /// Returns whether anything was removed.
    pub fn dequeue(&self, job: &JobHandle) -> bool {
        self.shared.dequeue(job)
    }

    /// Remove every queued job. Running jobs are not affected.
    pub fn dequeue_all(&self) {
        self.shared.dequeue_all();
    }

    /// Stop assigning jobs. Running jobs finish; [`WeaverEvent::Suspended`] is posted once
    /// none is left.
    pub fn suspend(&self) {
        self.shared.suspend();
    }

    /// Resume assigning jobs.
    pub fn resume(&self) {
        self.shared.resume();
    }

    /// `true` between [`Weaver::suspend`] and [`Weaver::resume`].
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Block until the queue is empty and no job is running.
    ///
    /// Blocks indefinitely on a suspended weaver with queued jobs; see
    /// [`Weaver::finish_timeout`].
    pub fn finish(&self) {
        self.shared.finish(None);
    }

    /// [`Weaver::finish`] with a limit. Returns `true` if the weaver became idle.
    #[must_use]
    pub fn finish_timeout(&self, timeout: Duration) -> bool {
        self.shared.finish(Some(timeout))
    }

    /// `true` if no job is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    /// `true` if no job is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().is_idle()
    }

    /// Number of queued jobs. A composite counts as one until it starts.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of jobs currently assigned to workers.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Workers and their states.
    #[must_use]
    pub fn threads(&self) -> Vec<(WorkerId, WorkerState)> {
        self.shared
            .state
            .lock()
            .workers
            .iter()
            .map(|(id, state)| (*id, *state))
            .collect()
    }

    /// Size of the worker inventory.
    #[must_use]
    pub fn current_number_of_threads(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    /// Inventory limit.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.shared.config.max_threads
    }

    /// Observable state.
    #[must_use]
    pub fn state(&self) -> WeaverState {
        self.shared.state()
    }

    /// Receive every event posted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<WeaverEvent> {
        self.shared.events.subscribe()
    }

    /// Register an additional event sink.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.shared.events.add_sink(sink);
    }

    /// Stop accepting work, let running jobs finish and join all workers. Idempotent.
    pub fn shut_down(&self) {
        self.shared.shut_down();
    }
}

impl Drop for Weaver {
    fn drop(&mut self) {
        self.shared.shut_down();
    }
}

impl fmt::Debug for Weaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Weaver")
            .field("id", &self.shared.id)
            .field("queue_length", &state.queue.len())
            .field("active", &state.active)
            .field("threads", &state.workers.len())
            .field("suspended", &state.suspended)
            .finish_non_exhaustive()
    }
}
