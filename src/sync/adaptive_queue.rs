//! C7: a queue that wraps both the mutex-guarded (C4) and lock-free (C5)
//! queues behind one interface, switching between them based on observed
//! contention (spec §4.8; mode/policy/accuracy-guard shape carried from
//! `original_source`'s `adaptive_job_queue.h`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::capabilities::QueueCapabilities;
use crate::error::Error;
use crate::job::OwnedJob;
use crate::sync::lockfree_queue::LockFreeQueue;
use crate::sync::mutex_queue::MutexQueue;

/// Which concrete queue an [`AdaptiveQueue`] is currently routing through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Routed through the mutex-guarded queue: exact `size()`, blocking
    /// `dequeue()`, lower peak throughput under contention.
    Mutex,
    /// Routed through the lock-free queue: best-effort `size()`, no
    /// blocking wait, higher peak throughput under contention.
    LockFree,
}

/// Controls when (if ever) an [`AdaptiveQueue`] switches mode.
#[derive(Debug, Clone, Copy)]
pub enum SwitchPolicy {
    /// Never switch; always use the given mode.
    Fixed(QueueMode),
    /// Switch to `LockFree` once pending size crosses
    /// `high_watermark`, and back to `Mutex` once it falls below
    /// `low_watermark`. `low_watermark` must be `<= high_watermark`.
    Adaptive {
        low_watermark: usize,
        high_watermark: usize,
    },
}

/// Configuration for [`AdaptiveQueue::new`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveQueueConfig {
    pub policy: SwitchPolicy,
    /// Hazard-slot budget forwarded to the internal lock-free queue.
    pub hazard_capacity: usize,
}

impl Default for AdaptiveQueueConfig {
    fn default() -> Self {
        AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 4,
                high_watermark: 64,
            },
            hazard_capacity: 64,
        }
    }
}

/// Running counters exposed for diagnostics.
#[derive(Debug, Default)]
pub struct AdaptiveStats {
    pub switches_to_lock_free: u64,
    pub switches_to_mutex: u64,
    pub enqueues: u64,
    pub dequeues: u64,
}

struct Counters {
    switches_to_lock_free: AtomicU64,
    switches_to_mutex: AtomicU64,
    enqueues: AtomicU64,
    dequeues: AtomicU64,
}

/// A queue that migrates jobs between a mutex-guarded and a lock-free
/// backend as contention rises and falls, while presenting one stable API.
pub struct AdaptiveQueue {
    mutex_backend: MutexQueue,
    lockfree_backend: LockFreeQueue,
    mode: Mutex<QueueMode>,
    migration_lock: Mutex<()>,
    policy: SwitchPolicy,
    approx_len: AtomicUsize,
    counters: Counters,
    /// Active [`AdaptiveQueue::with_accurate_size`] callers. Mode is pinned
    /// to `Mutex` on the 0->1 transition and released on the 1->0
    /// transition, so nested/concurrent guards compose (spec §4.6).
    accuracy_guards: AtomicUsize,
    /// The mode to restore once `accuracy_guards` drops back to zero.
    pinned_mode: Mutex<Option<QueueMode>>,
}

impl AdaptiveQueue {
    /// Creates a queue starting in the mode `policy` implies (`Mutex` for
    /// an adaptive policy's initial state, or the fixed mode).
    pub fn new(config: AdaptiveQueueConfig) -> Self {
        let initial = match config.policy {
            SwitchPolicy::Fixed(mode) => mode,
            SwitchPolicy::Adaptive { .. } => QueueMode::Mutex,
        };
        AdaptiveQueue {
            mutex_backend: MutexQueue::new(),
            lockfree_backend: LockFreeQueue::with_hazard_capacity(config.hazard_capacity),
            mode: Mutex::new(initial),
            migration_lock: Mutex::new(()),
            policy: config.policy,
            approx_len: AtomicUsize::new(0),
            counters: Counters {
                switches_to_lock_free: AtomicU64::new(0),
                switches_to_mutex: AtomicU64::new(0),
                enqueues: AtomicU64::new(0),
                dequeues: AtomicU64::new(0),
            },
            accuracy_guards: AtomicUsize::new(0),
            pinned_mode: Mutex::new(None),
        }
    }

    /// The mode currently in effect.
    pub fn mode(&self) -> QueueMode {
        *self.mode.lock().unwrap()
    }

    /// Routes `job` to the active backend, then re-evaluates the switch
    /// policy.
    pub fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        let result = match self.mode() {
            QueueMode::Mutex => self.mutex_backend.enqueue(job),
            QueueMode::LockFree => self.lockfree_backend.enqueue(job),
        };
        if result.is_ok() {
            self.approx_len.fetch_add(1, Ordering::Relaxed);
            self.counters.enqueues.fetch_add(1, Ordering::Relaxed);
            self.maybe_switch();
        }
        result
    }

    /// Routes to the active backend's non-blocking dequeue, then
    /// re-evaluates the switch policy.
    pub fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        let result = match self.mode() {
            QueueMode::Mutex => self.mutex_backend.try_dequeue(),
            QueueMode::LockFree => self.lockfree_backend.try_dequeue(),
        };
        if result.is_ok() {
            self.approx_len.fetch_sub(1, Ordering::Relaxed);
            self.counters.dequeues.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_switch();
        result
    }

    /// Blocks until a job is ready. Only meaningful while in `Mutex` mode;
    /// falls back to a short spin-then-retry loop in `LockFree` mode, which
    /// has no blocking primitive (spec §4.4's lock-free capability set).
    pub fn dequeue(&self) -> Result<OwnedJob, Error> {
        loop {
            match self.mode() {
                QueueMode::Mutex => return self.mutex_backend.dequeue(),
                QueueMode::LockFree => match self.try_dequeue() {
                    Ok(job) => return Ok(job),
                    Err(Error::QueueEmpty) => {
                        if self.lockfree_backend.is_closed() {
                            return Err(Error::QueueEmpty);
                        }
                        std::thread::yield_now();
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Forces an immediate switch to `target`, migrating every pending job.
    /// No-op if already in `target` mode.
    pub fn force_mode(&self, target: QueueMode) {
        let _migration = self.migration_lock.lock().unwrap();
        self.force_mode_locked(target);
    }

    /// Does the actual migrate-and-swap; assumes `migration_lock` is
    /// already held by the caller.
    fn force_mode_locked(&self, target: QueueMode) {
        let mut mode = self.mode.lock().unwrap();
        if *mode == target {
            return;
        }
        self.migrate(*mode, target);
        *mode = target;
        match target {
            QueueMode::LockFree => {
                self.counters.switches_to_lock_free.fetch_add(1, Ordering::Relaxed);
            }
            QueueMode::Mutex => {
                self.counters.switches_to_mutex.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn migrate(&self, from: QueueMode, to: QueueMode) {
        match (from, to) {
            (QueueMode::Mutex, QueueMode::LockFree) => {
                for job in self.mutex_backend.drain() {
                    let _ = self.lockfree_backend.enqueue(job);
                }
            }
            (QueueMode::LockFree, QueueMode::Mutex) => {
                while let Ok(job) = self.lockfree_backend.try_dequeue() {
                    let _ = self.mutex_backend.enqueue(job);
                }
            }
            _ => {}
        }
    }

    fn maybe_switch(&self) {
        let SwitchPolicy::Adaptive {
            low_watermark,
            high_watermark,
        } = self.policy
        else {
            return;
        };
        if self.accuracy_guards.load(Ordering::Acquire) > 0 {
            // An accuracy guard has the queue pinned in `Mutex`; let it
            // release before auto-switching decides anything.
            return;
        }
        let pending = self.approx_len.load(Ordering::Relaxed);
        let current = self.mode();
        if current == QueueMode::Mutex && pending >= high_watermark {
            self.force_mode(QueueMode::LockFree);
        } else if current == QueueMode::LockFree && pending <= low_watermark {
            self.force_mode(QueueMode::Mutex);
        }
    }

    /// Stops both backends: wakes blocked consumers and rejects new work.
    pub fn stop_waiting(&self) {
        self.mutex_backend.stop_waiting();
        self.lockfree_backend.close();
    }

    /// A best-effort length; exact only while `mode()` is `Mutex`. Wrap a
    /// read with [`AdaptiveQueue::with_accurate_size`] when exactness
    /// matters regardless of mode.
    pub fn approximate_size(&self) -> usize {
        self.approx_len.load(Ordering::Relaxed)
    }

    /// Runs `f` with the queue temporarily pinned in `Mutex` mode, so
    /// `size()`/`empty()` reads inside `f` are exact, then restores whatever
    /// mode was active before -- the RAII "accuracy guard" from
    /// `original_source`'s `adaptive_job_queue.h`, reference-counted so
    /// nested or concurrent callers compose (spec §4.6): mode is pinned on
    /// the first caller in and restored only once the last caller out
    /// releases it.
    pub fn with_accurate_size<R>(&self, f: impl FnOnce(&MutexQueue) -> R) -> R {
        self.acquire_accuracy_guard();
        let result = f(&self.mutex_backend);
        self.release_accuracy_guard();
        result
    }

    /// Pins the queue in `Mutex` mode on the 0->1 transition of the guard
    /// count, recording whatever mode was active so it can be restored.
    fn acquire_accuracy_guard(&self) {
        let _migration = self.migration_lock.lock().unwrap();
        if self.accuracy_guards.fetch_add(1, Ordering::AcqRel) == 0 {
            let previous = self.mode();
            *self.pinned_mode.lock().unwrap() = Some(previous);
            self.force_mode_locked(QueueMode::Mutex);
        }
    }

    /// Restores the pre-guard mode on the 1->0 transition of the guard
    /// count; a no-op for every caller that isn't last out.
    fn release_accuracy_guard(&self) {
        let _migration = self.migration_lock.lock().unwrap();
        if self.accuracy_guards.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(previous) = self.pinned_mode.lock().unwrap().take() {
                self.force_mode_locked(previous);
            }
        }
    }

    /// Capabilities of whichever backend is presently active.
    pub fn capabilities(&self) -> QueueCapabilities {
        match self.mode() {
            QueueMode::Mutex => QueueCapabilities::MUTEX,
            QueueMode::LockFree => QueueCapabilities::LOCK_FREE,
        }
    }

    /// Snapshot of switch/throughput counters.
    pub fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            switches_to_lock_free: self.counters.switches_to_lock_free.load(Ordering::Relaxed),
            switches_to_mutex: self.counters.switches_to_mutex.load(Ordering::Relaxed),
            enqueues: self.counters.enqueues.load(Ordering::Relaxed),
            dequeues: self.counters.dequeues.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use std::sync::Arc;

    fn job(name: &str) -> OwnedJob {
        Box::new(FnJob::new(name, || Ok(())))
    }

    #[test]
    fn starts_in_mutex_mode_and_switches_under_load() {
        let queue = AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 2,
                high_watermark: 5,
            },
            hazard_capacity: 16,
        });
        assert_eq!(queue.mode(), QueueMode::Mutex);
        for i in 0..10 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);
    }

    #[test]
    fn switches_back_to_mutex_once_drained() {
        let queue = AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 1,
                high_watermark: 3,
            },
            hazard_capacity: 16,
        });
        for i in 0..5 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);
        while queue.try_dequeue().is_ok() {}
        assert_eq!(queue.mode(), QueueMode::Mutex);
    }

    #[test]
    fn accuracy_guard_reports_exact_size_and_restores_mode() {
        let queue = AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 1,
                high_watermark: 2,
            },
            hazard_capacity: 16,
        });
        for i in 0..4 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);
        let exact = queue.with_accurate_size(|q| q.size());
        assert_eq!(exact, 4);
        assert_eq!(queue.mode(), QueueMode::LockFree);
    }

    #[test]
    fn nested_accuracy_guards_compose_without_releasing_early() {
        let queue = AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 1,
                high_watermark: 2,
            },
            hazard_capacity: 16,
        });
        for i in 0..4 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);

        queue.acquire_accuracy_guard();
        assert_eq!(queue.mode(), QueueMode::Mutex);
        queue.acquire_accuracy_guard();
        assert_eq!(queue.mode(), QueueMode::Mutex);

        // The first guard out must not restore the mode while the second
        // is still outstanding.
        queue.release_accuracy_guard();
        assert_eq!(queue.mode(), QueueMode::Mutex);

        queue.release_accuracy_guard();
        assert_eq!(queue.mode(), QueueMode::LockFree);
    }

    #[test]
    fn concurrent_accuracy_guards_see_a_consistently_exact_mutex_mode() {
        let queue = Arc::new(AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Adaptive {
                low_watermark: 1,
                high_watermark: 2,
            },
            hazard_capacity: 16,
        }));
        for i in 0..8 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        queue.with_accurate_size(|q| {
                            // Every concurrent reader must observe exact
                            // Mutex-mode semantics while any guard is held.
                            let _ = q.size();
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::LockFree);
    }

    #[test]
    fn fixed_policy_never_switches() {
        let queue = Arc::new(AdaptiveQueue::new(AdaptiveQueueConfig {
            policy: SwitchPolicy::Fixed(QueueMode::Mutex),
            hazard_capacity: 16,
        }));
        for i in 0..20 {
            queue.enqueue(job(&format!("job{i}"))).unwrap();
        }
        assert_eq!(queue.mode(), QueueMode::Mutex);
    }
}
