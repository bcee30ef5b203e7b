//! Admission control consulted before a queued job is handed to a worker.
//!
//! Policies are shared between many jobs (one [`ResourceRestrictionPolicy`] typically caps
//! hundreds of decode jobs). They are called while the weaver holds its internal lock, so they
//! keep their own lock and must never call back into the weaver.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::job::JobHandle;
use crate::util::serde::JobId;

/// An admission predicate attached to jobs with [`JobHandle::assign_queue_policy`].
///
/// The scheduler keeps the calls balanced: every job for which `can_run` returned `true`
/// receives exactly one `release`, either because another policy of the same job declined or
/// because the job finished or was aborted.
///
/// A policy may be shared by jobs queued in different weavers. A `release` wakes only the
/// weaver that executed the job, so jobs of another weaver held back by the same policy are
/// scanned again on that weaver's next enqueue or completion. [`crate::core::Weaver::finish`]
/// on a weaver whose only queued jobs wait for such a slot can therefore block; use
/// `finish_timeout` there.
pub trait QueuePolicy: Send + Sync {
    /// Decide whether `job` may be assigned to a worker now. Must be fast and non-blocking.
    fn can_run(&self, job: &JobHandle) -> bool;

    /// Undo a successful `can_run`.
    fn release(&self, job: &JobHandle);

    /// The job carrying this policy is being destroyed.
    fn destructed(&self, job: JobId) {
        let _ = job;
    }
}

/// Caps how many jobs carrying this policy may execute at the same time.
///
/// Shared across weavers, a freed slot is only noticed by the other weavers when they next
/// scan their queue; see [`QueuePolicy`].
pub struct ResourceRestrictionPolicy {
    cap: usize,
    holders: Mutex<HashSet<JobId>>,
}

impl ResourceRestrictionPolicy {
    /// Allow at most `cap` concurrently admitted jobs.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            holders: Mutex::new(HashSet::new()),
        }
    }

    /// Configured limit.
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Number of jobs currently holding a slot.
    #[must_use]
    pub fn active(&self) -> usize {
        self.holders.lock().len()
    }
}

impl QueuePolicy for ResourceRestrictionPolicy {
    fn can_run(&self, job: &JobHandle) -> bool {
        let mut holders = self.holders.lock();
        if holders.contains(&job.id()) {
            return true;
        }
        if holders.len() < self.cap {
            holders.insert(job.id());
            true
        } else {
            debug!(job_id = %job.id(), cap = self.cap, "resource restriction declined job");
            false
        }
    }

    fn release(&self, job: &JobHandle) {
        self.holders.lock().remove(&job.id());
    }

    fn destructed(&self, job: JobId) {
        self.holders.lock().remove(&job);
    }
}

impl fmt::Debug for ResourceRestrictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRestrictionPolicy")
            .field("cap", &self.cap)
            .field("active", &self.active())
            .finish()
    }
}
