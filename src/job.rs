//! C1: the `Job` capability and its stable identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::error::Error;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// A process-wide monotonic job id. Ids are never reused.
pub fn next_job_id() -> u64 {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

/// A unit of work executed by a [`Worker`](crate::worker::Worker).
///
/// `run` is the only required method; everything else is metadata fixed at
/// construction time. Cancellation is cooperative (spec §4.1): `run` should
/// poll [`Job::cancellation`] at sensible points and return `Err(Error::Cancelled)`
/// if it observes a cancelled token. No preemption is offered.
pub trait Job: Send {
    /// Executes the job to completion. Panics are caught by the worker and
    /// surfaced as `Error::JobExecutionFailed`; they never poison the pool.
    fn run(&mut self) -> Result<(), Error>;

    /// A short, human-readable name used in diagnostics.
    fn name(&self) -> &str;

    /// The job's stable id, assigned once at construction and immutable for
    /// the job's lifetime.
    fn id(&self) -> u64;

    /// The instant the job was handed to a queue. Immutable once submitted.
    fn enqueued_at(&self) -> Instant;

    /// The job's cancellation token, if one was attached at construction.
    fn cancellation(&self) -> Option<&CancellationToken> {
        None
    }
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Owning handle to a boxed, type-erased job. This is what queues actually
/// store: ownership moves exclusively from producer to queue to worker
/// (spec §3, Job lifecycle).
pub type OwnedJob = Box<dyn Job>;

/// A `Job` built from a plain closure, for callers who don't want to define
/// their own type. Mirrors the "virtual inheritance job hierarchy ->
/// concrete struct implementing one capability" redesign note (spec §9).
pub struct FnJob<F>
where
    F: FnMut() -> Result<(), Error> + Send,
{
    id: u64,
    name: String,
    enqueued_at: Instant,
    cancellation: Option<CancellationToken>,
    f: F,
}

impl<F> FnJob<F>
where
    F: FnMut() -> Result<(), Error> + Send,
{
    /// Wraps `f` as a job, assigning it a fresh id and timestamping it now.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnJob {
            id: next_job_id(),
            name: name.into(),
            enqueued_at: Instant::now(),
            cancellation: None,
            f,
        }
    }

    /// Attaches a cancellation token to this job.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl<F> Job for FnJob<F>
where
    F: FnMut() -> Result<(), Error> + Send,
{
    fn run(&mut self) -> Result<(), Error> {
        (self.f)()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}
