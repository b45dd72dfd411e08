//! The queue capability descriptor (spec §4.4/§6), the authoritative answer
//! to "is size() exact" questions that the C++ origin answered inconsistently
//! (spec §9 Open Question).

/// Describes what guarantees a particular queue implementation actually
/// offers, so callers don't have to infer it from behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapabilities {
    /// `size()` returns an exact count.
    pub exact_size: bool,
    /// `empty()` is an atomic, linearizable check.
    pub atomic_empty_check: bool,
    /// The queue never blocks a producer or consumer behind a mutex.
    pub lock_free: bool,
    /// Every operation completes in a bounded number of steps regardless of
    /// other threads' progress.
    pub wait_free: bool,
    /// The queue exposes a batch enqueue/dequeue operation.
    pub supports_batch: bool,
    /// `dequeue()` can block the caller until work arrives.
    pub supports_blocking_wait: bool,
    /// The queue has a `stop()`/"no more work" signal.
    pub supports_stop: bool,
}

impl QueueCapabilities {
    /// Capabilities of the mutex-guarded FIFO queue (C4): exact and atomic,
    /// but not lock-free.
    pub const MUTEX: QueueCapabilities = QueueCapabilities {
        exact_size: true,
        atomic_empty_check: true,
        lock_free: false,
        wait_free: false,
        supports_batch: true,
        supports_blocking_wait: true,
        supports_stop: true,
    };

    /// Capabilities of the lock-free Michael-Scott queue (C5): size and
    /// emptiness are hints only, per spec §4.4/§9.
    pub const LOCK_FREE: QueueCapabilities = QueueCapabilities {
        exact_size: false,
        atomic_empty_check: false,
        lock_free: true,
        wait_free: false,
        supports_batch: false,
        supports_blocking_wait: false,
        supports_stop: true,
    };
}
