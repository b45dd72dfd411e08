//! C8: a priority-partitioned queue -- one [`MutexQueue`] sub-queue per
//! [`Priority`] level, dequeued in ascending (most-urgent-first) order, with
//! an optional accepted-type filter for workers that only service a subset
//! of job kinds (spec §4.7/§3).

use crate::error::Error;
use crate::job::OwnedJob;
use crate::priority::{Priority, ALL_PRIORITIES};
use crate::sync::mutex_queue::MutexQueue;

/// A job's type tag, used by [`TypedQueue::dequeue_accepting`] to let a
/// worker service only the kinds it's configured for. `0` means "accepts
/// anything" by convention; the queue itself never interprets the value.
pub type JobType = u32;

/// Accepts every job type; the default filter for `dequeue()`.
pub const ANY_TYPE: JobType = 0;

struct Bucket {
    priority: Priority,
    queue: MutexQueue,
}

/// A queue that partitions work by [`Priority`] and always serves the
/// highest-urgency non-empty bucket first. Each bucket is itself a
/// [`MutexQueue`], so individual pushes/pops are exact and blocking-capable.
pub struct TypedQueue {
    buckets: Vec<Bucket>,
}

impl Default for TypedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TypedQueue {
    /// Creates one empty bucket per [`Priority`] level.
    pub fn new() -> Self {
        TypedQueue {
            buckets: ALL_PRIORITIES
                .iter()
                .map(|&priority| Bucket {
                    priority,
                    queue: MutexQueue::new(),
                })
                .collect(),
        }
    }

    /// Enqueues `job` into its priority's bucket.
    pub fn enqueue(&self, priority: Priority, job: OwnedJob) -> Result<(), Error> {
        self.bucket(priority).queue.enqueue(job)
    }

    /// Returns the highest-priority ready job, scanning buckets in ascending
    /// (most-urgent-first) order. Does not block.
    pub fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        for bucket in &self.buckets {
            match bucket.queue.try_dequeue() {
                Ok(job) => return Ok(job),
                Err(Error::QueueEmpty) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::QueueEmpty)
    }

    /// As [`TypedQueue::try_dequeue`], but only bucket scanning is filtered
    /// by `type_of`: a job is returned only if `type_of(&*job)` is in
    /// `accepted`, or `accepted` is empty (meaning "any").
    pub fn dequeue_accepting<F>(&self, accepted: &[JobType], type_of: F) -> Result<OwnedJob, Error>
    where
        F: Fn(&dyn crate::job::Job) -> JobType,
    {
        if accepted.is_empty() {
            return self.try_dequeue();
        }
        for bucket in &self.buckets {
            let drained = bucket.queue.drain();
            let mut kept = Vec::with_capacity(drained.len());
            let mut found = None;
            for job in drained {
                if found.is_none() && accepted.contains(&type_of(job.as_ref())) {
                    found = Some(job);
                } else {
                    kept.push(job);
                }
            }
            for job in kept {
                // Re-enqueue unselected jobs; best-effort order preservation
                // within the bucket (the drained batch is pushed back in its
                // original relative order).
                bucket.queue.enqueue(job)?;
            }
            if let Some(job) = found {
                return Ok(job);
            }
        }
        Err(Error::QueueEmpty)
    }

    /// Blocks until a job of any priority is ready.
    pub fn dequeue(&self) -> Result<OwnedJob, Error> {
        loop {
            match self.try_dequeue() {
                Ok(job) => return Ok(job),
                Err(Error::QueueEmpty) => {
                    if self.all_stopped() {
                        return Err(Error::QueueEmpty);
                    }
                    // No single condvar spans every bucket; briefly block on
                    // the lowest-priority bucket's condvar as a wake signal,
                    // then re-scan from the top. This trades a little
                    // latency for avoiding a second synchronization
                    // primitive across buckets.
                    let _ = self.buckets.last().unwrap().queue.try_dequeue();
                    std::thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops every bucket, waking blocked consumers and rejecting further
    /// enqueues.
    pub fn stop_waiting(&self) {
        for bucket in &self.buckets {
            bucket.queue.stop_waiting();
        }
    }

    fn all_stopped(&self) -> bool {
        self.buckets.iter().all(|b| b.queue.is_stopped())
    }

    /// Total jobs across every priority bucket.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|b| b.queue.size()).sum()
    }

    /// Whether every bucket is empty.
    pub fn empty(&self) -> bool {
        self.buckets.iter().all(|b| b.queue.empty())
    }

    /// Per-priority pending count, in `ALL_PRIORITIES` order.
    pub fn size_by_priority(&self) -> Vec<(Priority, usize)> {
        self.buckets
            .iter()
            .map(|b| (b.priority, b.queue.size()))
            .collect()
    }

    fn bucket(&self, priority: Priority) -> &MutexQueue {
        &self
            .buckets
            .iter()
            .find(|b| b.priority == priority)
            .expect("every Priority has a bucket")
            .queue
    }
}
