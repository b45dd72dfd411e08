//! Queue primitives (C3-C9): a mutex-guarded FIFO, a lock-free MPMC queue
//! and its hazard-pointer reclamation domain, a Chase-Lev work-stealing
//! deque, and the typed/aging/adaptive queues built on top of them.

pub(crate) mod hazard;

pub mod adaptive_queue;
pub mod aging_queue;
pub(crate) mod deque;
pub mod lockfree_queue;
pub mod mutex_queue;
pub mod typed_queue;

pub use adaptive_queue::{AdaptiveQueue, AdaptiveQueueConfig, AdaptiveStats, QueueMode, SwitchPolicy};
pub use aging_queue::{AgingQueue, AgingQueueConfig, AgingStats, StarvationEvent};
pub use lockfree_queue::LockFreeQueue;
pub use mutex_queue::MutexQueue;
pub use typed_queue::{JobType, TypedQueue, ANY_TYPE};

use crate::error::Error;
use crate::job::OwnedJob;

/// A shared source of work a [`crate::worker::Worker`] can pull from once
/// its local deque and steal attempts both come up empty. Implemented by
/// every queue kind so the pool can wire in whichever one it's configured
/// with without `Worker` needing to know the concrete type.
pub trait Injector: Send + Sync {
    /// Non-blocking pop; `Err(Error::QueueEmpty)` means "nothing right now",
    /// not "stopped forever".
    fn try_dequeue(&self) -> Result<OwnedJob, Error>;

    /// Pushes a job for some worker to eventually pick up.
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error>;

    /// Signals no more work is coming; wakes anything blocked.
    fn stop_waiting(&self);

    /// Best-effort pending-job count, for diagnostics only -- callers must
    /// not rely on this being exact (spec §4.4/§9: only C4 guarantees an
    /// exact `size()`, and even that is point-in-time under concurrent
    /// access). Defaults to `0` for implementations that don't track it.
    fn approximate_len(&self) -> usize {
        0
    }
}

impl Injector for MutexQueue {
    fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        MutexQueue::try_dequeue(self)
    }
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        MutexQueue::enqueue(self, job)
    }
    fn stop_waiting(&self) {
        MutexQueue::stop_waiting(self)
    }
    fn approximate_len(&self) -> usize {
        MutexQueue::size(self)
    }
}

impl Injector for LockFreeQueue {
    fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        LockFreeQueue::try_dequeue(self)
    }
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        LockFreeQueue::enqueue(self, job)
    }
    fn stop_waiting(&self) {
        LockFreeQueue::close(self)
    }
    fn approximate_len(&self) -> usize {
        LockFreeQueue::approximate_size(self)
    }
}

impl Injector for TypedQueue {
    fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        TypedQueue::try_dequeue(self)
    }
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        TypedQueue::enqueue(self, crate::priority::Priority::Batch, job)
    }
    fn stop_waiting(&self) {
        TypedQueue::stop_waiting(self)
    }
    fn approximate_len(&self) -> usize {
        TypedQueue::size(self)
    }
}

impl Injector for AgingQueue {
    fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        AgingQueue::try_dequeue(self)
    }
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        AgingQueue::enqueue(self, crate::priority::Priority::Batch, job)
    }
    fn stop_waiting(&self) {
        AgingQueue::stop_waiting(self)
    }
    fn approximate_len(&self) -> usize {
        AgingQueue::size(self)
    }
}

impl Injector for AdaptiveQueue {
    fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        AdaptiveQueue::try_dequeue(self)
    }
    fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        AdaptiveQueue::enqueue(self, job)
    }
    fn stop_waiting(&self) {
        AdaptiveQueue::stop_waiting(self)
    }
    fn approximate_len(&self) -> usize {
        AdaptiveQueue::approximate_size(self)
    }
}
