//! C3: hazard-pointer domain for safe reclamation of nodes shared between
//! the lock-free MPMC queue's concurrent readers (spec §3 `HazardDomain`,
//! §4.2).
//!
//! Unlike a full per-thread-unbounded-slot design, this domain uses a
//! fixed-capacity slot table (grown lazily up to `max_slots`) and a single
//! domain-wide retired list rather than one retired list per thread. This
//! keeps reclamation correct -- no retired node is ever freed while a slot
//! still publishes its address -- while avoiding the generic-thread-local
//! storage problem of keying a `thread_local!` by an arbitrary domain
//! instance. See DESIGN.md for the trade-off.

use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

struct Slot<T> {
    claimed: AtomicBool,
    ptr: CachePadded<AtomicPtr<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            claimed: AtomicBool::new(false),
            ptr: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }
}

/// Per-thread pointer-publication domain with scan-based reclamation.
pub(crate) struct HazardDomain<T> {
    slots: Vec<Slot<T>>,
    retired: Mutex<Vec<*mut T>>,
    active_slots: AtomicUsize,
}

// The domain only ever moves `*mut T` that were created via `Box::into_raw`
// between threads inside retired/slots; all mutation goes through atomics
// or the retired mutex.
unsafe impl<T> Send for HazardDomain<T> {}
unsafe impl<T> Sync for HazardDomain<T> {}

impl<T> HazardDomain<T> {
    /// Creates a domain with room for `max_slots` concurrently-active
    /// hazard pointers (i.e. concurrent readers). Exceeding this is safe
    /// but causes `acquire()` to spin until a slot frees up.
    pub(crate) fn new(max_slots: usize) -> Self {
        let mut slots = Vec::with_capacity(max_slots.max(1));
        for _ in 0..max_slots.max(1) {
            slots.push(Slot::new());
        }
        HazardDomain {
            slots,
            retired: Mutex::new(Vec::new()),
            active_slots: AtomicUsize::new(0),
        }
    }

    /// Claims a free slot for the calling thread. Call once per logical
    /// hazard-pointer use (e.g. once per dequeue attempt); drop the guard
    /// (or call `release`) promptly afterwards.
    pub(crate) fn acquire(&self) -> HazardGuard<'_, T> {
        loop {
            for (index, slot) in self.slots.iter().enumerate() {
                if slot
                    .claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    self.active_slots.fetch_add(1, Ordering::Relaxed);
                    return HazardGuard {
                        domain: self,
                        index,
                    };
                }
            }
            std::thread::yield_now();
        }
    }

    /// Republishes `candidate` into `slot` and re-reads `source` to make
    /// sure the node wasn't freed between the initial load and the
    /// publication (spec §4.2's ABA-closing protocol). Returns the
    /// validated pointer, looping internally until source is stable.
    fn protect_inner(&self, index: usize, source: &AtomicPtr<T>) -> *mut T {
        loop {
            let candidate = source.load(Ordering::Acquire);
            self.slots[index].ptr.store(candidate, Ordering::Release);
            let revalidate = source.load(Ordering::Acquire);
            if candidate == revalidate {
                return candidate;
            }
            // `source` moved on between our load and publish; the node we
            // published might already be retired. Try again with the
            // fresher pointer.
        }
    }

    /// Defers freeing `node` until no slot publishes it. May trigger a
    /// scan (and free a batch of nodes) if the retired list has grown
    /// past `2 * active_slots`.
    ///
    /// # Safety
    /// `node` must have been allocated with `Box::into_raw` and must not be
    /// freed through any other path.
    pub(crate) unsafe fn retire(&self, node: *mut T) {
        if node.is_null() {
            return;
        }
        let should_scan = {
            let mut retired = self.retired.lock().unwrap();
            retired.push(node);
            let threshold = 2 * self.active_slots.load(Ordering::Relaxed).max(1);
            retired.len() > threshold
        };
        if should_scan {
            self.scan();
        }
    }

    /// Scans all claimed slots and frees every retired node that no slot
    /// currently publishes. Safe to call at any time, e.g. from `Drop`.
    pub(crate) fn scan(&self) {
        // Sequentially-consistent fence before reading slots: makes sure
        // every retirement that happened-before this call is visible to
        // the scan on weak-memory architectures (spec §4.2).
        fence(Ordering::SeqCst);

        let mut protected: Vec<*mut T> = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            if slot.claimed.load(Ordering::Acquire) {
                let p = slot.ptr.load(Ordering::Acquire);
                if !p.is_null() {
                    protected.push(p);
                }
            }
        }

        let mut retired = self.retired.lock().unwrap();
        let mut still_retired = Vec::with_capacity(retired.len());
        let mut to_free = Vec::new();
        for node in retired.drain(..) {
            if protected.contains(&node) {
                still_retired.push(node);
            } else {
                to_free.push(node);
            }
        }
        *retired = still_retired;
        drop(retired);

        for node in to_free {
            unsafe {
                drop(Box::from_raw(node));
            }
        }
    }

    fn release(&self, index: usize) {
        self.slots[index].ptr.store(ptr::null_mut(), Ordering::Release);
        self.slots[index].claimed.store(false, Ordering::Release);
        self.active_slots.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<T> Drop for HazardDomain<T> {
    fn drop(&mut self) {
        // Every handle must have been dropped by the time the domain
        // itself is torn down; forcibly reclaim whatever remains.
        self.scan();
        let mut retired = self.retired.lock().unwrap();
        for node in retired.drain(..) {
            unsafe {
                drop(Box::from_raw(node));
            }
        }
    }
}

/// RAII handle to one claimed slot. `protect` may be called repeatedly
/// (e.g. once for `head`, once for `head.next`) by re-acquiring a fresh
/// guard for each logical protection, since nodes are small and slots are
/// plentiful relative to concurrent dequeuers.
pub(crate) struct HazardGuard<'a, T> {
    domain: &'a HazardDomain<T>,
    index: usize,
}

impl<'a, T> HazardGuard<'a, T> {
    /// Publishes and validates `source`'s current value, returning the
    /// stable pointer once it is safe to dereference.
    pub(crate) fn protect(&self, source: &AtomicPtr<T>) -> *mut T {
        self.domain.protect_inner(self.index, source)
    }
}

impl<'a, T> Drop for HazardGuard<'a, T> {
    fn drop(&mut self) {
        self.domain.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_node_is_not_freed_until_released() {
        let domain: HazardDomain<u32> = HazardDomain::new(4);
        let raw = Box::into_raw(Box::new(7u32));
        let source = AtomicPtr::new(raw);

        let guard = domain.acquire();
        let protected = guard.protect(&source);
        assert_eq!(protected, raw);

        unsafe {
            domain.retire(raw);
        }
        domain.scan();
        // still protected: the value must still be readable.
        assert_eq!(unsafe { *protected }, 7);

        drop(guard);
        domain.scan();
    }

    #[test]
    fn unprotected_retired_node_gets_reclaimed_on_scan() {
        let domain: HazardDomain<u32> = HazardDomain::new(4);
        let raw = Box::into_raw(Box::new(42u32));
        unsafe {
            domain.retire(raw);
        }
        domain.scan();
        // No assertion possible on freed memory directly; reaching here
        // without crashing under miri/ASan is the property under test.
    }
}
