//! C5: the lock-free Michael-Scott MPMC queue (spec §3/§4.5), grounded in
//! `original_source/lockfree/lockfree_job_queue.h`'s shape and reclaimed via
//! [`crate::sync::hazard`].

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::capabilities::QueueCapabilities;
use crate::error::Error;
use crate::job::OwnedJob;
use crate::sync::hazard::HazardDomain;

struct Node {
    job: Option<OwnedJob>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn sentinel() -> *mut Node {
        Box::into_raw(Box::new(Node {
            job: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A multi-producer, multi-consumer queue with no blocking in its fast
/// path. `size()`/`empty()` are best-effort hints only -- see
/// [`QueueCapabilities::LOCK_FREE`] -- because a linearizable count would
/// require a second synchronization point this design deliberately avoids.
pub struct LockFreeQueue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    domain: HazardDomain<Node>,
    approximate_len: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
}

impl Default for LockFreeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeQueue {
    /// Creates an empty queue with room for `max_concurrent_readers`
    /// simultaneous hazard-protected accesses (defaults to a generous 64 if
    /// `0` is passed).
    pub fn new() -> Self {
        Self::with_hazard_capacity(64)
    }

    /// As [`LockFreeQueue::new`], but with an explicit hazard-slot count --
    /// useful when a pool is known to run with many more than 64 workers.
    pub fn with_hazard_capacity(max_concurrent_readers: usize) -> Self {
        let sentinel = Node::sentinel();
        LockFreeQueue {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            domain: HazardDomain::new(max_concurrent_readers.max(1)),
            approximate_len: AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Pushes `job` onto the tail. Never blocks; retries internally against
    /// concurrent enqueuers until its CAS succeeds.
    pub fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueStopped);
        }
        let new_node = Box::into_raw(Box::new(Node {
            job: Some(job),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        loop {
            let guard = self.domain.acquire();
            let tail = guard.protect(&self.tail);
            let tail_ref = unsafe { &*tail };
            let next = tail_ref.next.load(Ordering::Acquire);

            if next.is_null() {
                if tail_ref
                    .next
                    .compare_exchange(
                        ptr::null_mut(),
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let _ = self.tail.compare_exchange(
                        tail,
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    self.approximate_len.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            } else {
                // Tail lagged behind; help it along before retrying.
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            }
        }
    }

    /// Pops the head job, if any. Returns `QueueEmpty` rather than blocking.
    pub fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        loop {
            let head_guard = self.domain.acquire();
            let head = head_guard.protect(&self.head);
            let tail = self.tail.load(Ordering::Acquire);
            let head_ref = unsafe { &*head };

            let next_guard = self.domain.acquire();
            let next = next_guard.protect(&head_ref.next);

            if head == self.head.load(Ordering::Acquire) {
                if next.is_null() {
                    return Err(Error::QueueEmpty);
                }
                if head == tail {
                    // Tail lagged behind a completed enqueue; help it along.
                    let _ = self.tail.compare_exchange(
                        tail,
                        next,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    continue;
                }

                let next_ref = unsafe { &*next };
                if self
                    .head
                    .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    // `next` becomes the new sentinel; its job moves out and
                    // `head` (the old sentinel) is retired.
                    let job = unsafe { (*(next as *mut Node)).job.take() };
                    let _ = next_ref;
                    self.approximate_len.fetch_sub(1, Ordering::Relaxed);
                    unsafe {
                        self.domain.retire(head);
                    }
                    return job.ok_or(Error::QueueEmpty);
                }
            }
        }
    }

    /// Signals the queue closed: further `enqueue` calls fail with
    /// `QueueStopped`. Already-queued jobs remain dequeueable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A best-effort length estimate; never treat this as exact (spec §9
    /// Open Question resolved in favor of an explicit hint, not a lie).
    pub fn approximate_size(&self) -> usize {
        self.approximate_len.load(Ordering::Relaxed)
    }

    /// A best-effort emptiness hint, racy under concurrent access.
    pub fn approximate_empty(&self) -> bool {
        self.approximate_size() == 0
    }

    /// Static capability descriptor for this queue kind.
    pub fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::LOCK_FREE
    }
}

impl Drop for LockFreeQueue {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed);
        }
    }
}

unsafe impl Send for LockFreeQueue {}
unsafe impl Sync for LockFreeQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn job(name: &str) -> OwnedJob {
        Box::new(FnJob::new(name, || Ok(())))
    }

    #[test]
    fn fifo_single_threaded() {
        let queue = LockFreeQueue::new();
        queue.enqueue(job("a")).unwrap();
        queue.enqueue(job("b")).unwrap();
        queue.enqueue(job("c")).unwrap();
        assert_eq!(queue.try_dequeue().unwrap().name(), "a");
        assert_eq!(queue.try_dequeue().unwrap().name(), "b");
        assert_eq!(queue.try_dequeue().unwrap().name(), "c");
        assert!(matches!(queue.try_dequeue(), Err(Error::QueueEmpty)));
    }

    #[test]
    fn close_rejects_new_enqueues_but_preserves_existing() {
        let queue = LockFreeQueue::new();
        queue.enqueue(job("a")).unwrap();
        queue.close();
        assert!(matches!(queue.enqueue(job("b")), Err(Error::QueueStopped)));
        assert_eq!(queue.try_dequeue().unwrap().name(), "a");
    }

    #[test]
    fn mpmc_stress_conserves_every_job() {
        let queue = Arc::new(LockFreeQueue::new());
        const PER_PRODUCER: usize = 1000;
        const PRODUCERS: usize = 4;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue(job(&format!("p{p}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let consumed = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let consumed = consumed.clone();
                std::thread::spawn(move || {
                    let mut n = 0;
                    loop {
                        match queue.try_dequeue() {
                            Ok(_) => {
                                n += 1;
                                consumed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(_) => {
                                if consumed.load(Ordering::SeqCst)
                                    >= PRODUCERS * PER_PRODUCER
                                {
                                    break;
                                }
                                if n == 0 {
                                    std::thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(consumed.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
    }
}
