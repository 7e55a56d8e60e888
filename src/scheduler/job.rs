//! Job contract for the priority worker pools.
//!
//! A [`Job`] is the polymorphic unit of work dispatched by a [`super::worker_pool::WorkerPool`].
//! Jobs are supplied by callers (simulation jobs, strategy-detection jobs, batch
//! jobs, ...); the pool only ever interacts with them through this trait.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// Opaque result payload produced by a job's [`Job::execute`].
///
/// Concrete job types downcast this via [`std::any::Any`] on the caller side
/// (through the job's own result channel) rather than the pool inspecting it.
pub type JobOutput = Box<dyn std::any::Any + Send>;

/// A unit of work executed by a [`super::worker_pool::WorkerPool`].
///
/// Implementors must be cheap to box and safe to run at most once: the pool
/// calls [`Job::execute`] exactly one time per submission. Re-submission after
/// completion (e.g. for retries) is the caller's responsibility, not the
/// pool's.
#[async_trait]
pub trait Job: Send + Sync {
    /// Globally unique identity of this job within the run.
    fn id(&self) -> &str;

    /// Scheduling priority; larger values are dispatched earlier.
    fn priority(&self) -> i64;

    /// Advisory timeout. The pool derives a cancellation deadline from
    /// `min(self.timeout(), pool.max_job_timeout)` measured from dispatch,
    /// not from submission.
    fn timeout(&self) -> Duration;

    /// Executes the job body. `cancel` is cancelled by the pool once the
    /// derived deadline elapses or the pool begins shutdown; implementations
    /// should check it at natural suspension points (awaits on channels,
    /// sub-task joins) rather than polling it tightly.
    ///
    /// Must never panic in a way that escapes the pool's worker loop with an
    /// inconsistent counter state — the pool catches unwinding panics at its
    /// boundary, but a job that panics still counts as failed, not completed.
    async fn execute(&self, cancel: CancellationToken) -> Result<JobOutput, JobError>;
}

/// Entry wrapping a boxed [`Job`] with scheduling metadata for the priority
/// queue. Ordering is `(priority desc, submission_seq asc)` so that a
/// [`std::collections::BinaryHeap`] (a max-heap) pops the highest-priority,
/// earliest-submitted job first.
pub(crate) struct ScheduledJob {
    pub job: Box<dyn Job>,
    pub submission_seq: u64,
    pub submitted_at: tokio::time::Instant,
}

impl ScheduledJob {
    pub fn new(job: Box<dyn Job>, submission_seq: u64) -> Self {
        Self {
            job,
            submission_seq,
            submitted_at: tokio::time::Instant::now(),
        }
    }
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.priority() == other.job.priority() && self.submission_seq == other.submission_seq
    }
}

impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; ties broken by earlier submission (FIFO),
        // hence the reversed comparison on submission_seq.
        self.job
            .priority()
            .cmp(&other.job.priority())
            .then_with(|| other.submission_seq.cmp(&self.submission_seq))
    }
}
