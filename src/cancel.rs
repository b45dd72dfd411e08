//! C2: cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    // `None` once cancellation has fired and the list has been drained;
    // callbacks registered afterwards run synchronously instead of being
    // stored. This is the "register-or-fire" pattern from spec §9: we never
    // need a second check-then-act race between `cancel()` and `on_cancel()`.
    callbacks: Mutex<Option<Vec<Callback>>>,
}

/// A shared, idempotent cancellation flag with synchronous callback
/// notification (spec §3/§4.1).
///
/// Transitions only `false -> true`. Registering a callback on an
/// already-cancelled token fires it immediately, on the calling thread.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    /// Returns `true` once `cancel()` has been called, from any thread.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Requests cancellation. Idempotent: the second and later calls are a
    /// no-op. Fires every registered callback exactly once, in registration
    /// order, on the calling thread.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let callbacks = self.inner.callbacks.lock().unwrap().take();
        if let Some(callbacks) = callbacks {
            for cb in callbacks {
                cb();
            }
        }
    }

    /// Registers a callback to run when cancellation occurs. If the token
    /// is already cancelled, `callback` runs synchronously, right here,
    /// before this call returns.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.inner.callbacks.lock().unwrap();
        match guard.as_mut() {
            Some(list) => list.push(Box::new(callback)),
            None => {
                drop(guard);
                callback();
            }
        }
    }
}
