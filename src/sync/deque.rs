//! C6: the Chase-Lev work-stealing deque (spec §3/§4.6).
//!
//! One `Owner` per worker thread pushes and pops from the bottom with plain
//! loads/stores; any number of `Stealer` handles steal from the top with a
//! CAS. The backing buffer is a power-of-two circular array that the owner
//! grows (never shrinks) when it runs out of room.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use crate::job::OwnedJob;

struct Buffer {
    mask: isize,
    slots: Box<[UnsafeCell<MaybeUninit<OwnedJob>>]>,
}

impl Buffer {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Buffer {
            mask: capacity as isize - 1,
            slots: slots.into_boxed_slice(),
        }
    }

    fn capacity(&self) -> isize {
        self.mask + 1
    }

    unsafe fn write(&self, index: isize, job: OwnedJob) {
        let slot = &self.slots[(index & self.mask) as usize];
        (*slot.get()).as_mut_ptr().write(job);
    }

    unsafe fn read(&self, index: isize) -> OwnedJob {
        let slot = &self.slots[(index & self.mask) as usize];
        (*slot.get()).as_ptr().read()
    }
}

struct Shared {
    top: AtomicIsize,
    bottom: AtomicIsize,
    buffer: AtomicPtr<Buffer>,
    // Buffers retired by `Owner::grow`. A stealer may have loaded the old
    // buffer pointer just before a grow swapped it out, so the old buffer
    // can't be freed immediately -- it's parked here and only reclaimed once
    // the whole deque (both Owner and every Stealer clone) is dropped. This
    // is the same retire-then-reclaim shape as `sync::hazard`, simplified
    // because deque growth is rare enough that unbounded-until-drop parking
    // is an acceptable trade (see DESIGN.md).
    retired_buffers: Mutex<Vec<*mut Buffer>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let buf = self.buffer.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        let bottom = self.bottom.load(Ordering::Relaxed);
        unsafe {
            let mut i = top;
            while i < bottom {
                drop((*buf).read(i));
                i += 1;
            }
            drop(Box::from_raw(buf));
        }
        for old in self.retired_buffers.lock().unwrap().drain(..) {
            unsafe {
                drop(Box::from_raw(old));
            }
        }
    }
}

/// Creates a linked owner/stealer pair sharing one buffer, starting at the
/// given initial capacity (rounded up to a power of two, minimum 8).
pub(crate) fn new(initial_capacity: usize) -> (Owner, Stealer) {
    let capacity = initial_capacity.max(8).next_power_of_two();
    let buffer = Box::into_raw(Box::new(Buffer::new(capacity)));
    let shared = Arc::new(Shared {
        top: AtomicIsize::new(0),
        bottom: AtomicIsize::new(0),
        buffer: AtomicPtr::new(buffer),
        retired_buffers: Mutex::new(Vec::new()),
    });
    (
        Owner {
            shared: shared.clone(),
        },
        Stealer { shared },
    )
}

/// The single-owner push/pop end of the deque. Not `Clone`: only the worker
/// thread that created the deque may hold one.
pub(crate) struct Owner {
    shared: Arc<Shared>,
}

unsafe impl Send for Owner {}

/// A cloneable handle other worker threads use to steal from the bottom-most
/// available job (i.e. the top of the deque).
#[derive(Clone)]
pub(crate) struct Stealer {
    shared: Arc<Shared>,
}

unsafe impl Send for Stealer {}
unsafe impl Sync for Stealer {}

/// Result of a steal attempt.
pub(crate) enum Steal {
    /// Nothing was available.
    Empty,
    /// Another thread won the race for the only remaining item; retry.
    Retry,
    /// A job was stolen successfully.
    Success(OwnedJob),
}

impl Owner {
    /// Pushes a job onto the bottom of the deque, growing the backing buffer
    /// if it's full. Only the owning thread may call this.
    pub(crate) fn push(&self, job: OwnedJob) {
        let bottom = self.shared.bottom.load(Ordering::Relaxed);
        let top = self.shared.top.load(Ordering::Acquire);
        let buf_ptr = self.shared.buffer.load(Ordering::Relaxed);
        let buf = unsafe { &*buf_ptr };

        let len = bottom - top;
        if len >= buf.capacity() {
            self.grow(buf_ptr, bottom, top);
        }

        let buf_ptr = self.shared.buffer.load(Ordering::Relaxed);
        let buf = unsafe { &*buf_ptr };
        unsafe {
            buf.write(bottom, job);
        }
        self.shared.bottom.store(bottom + 1, Ordering::Release);
    }

    fn grow(&self, old_ptr: *mut Buffer, bottom: isize, top: isize) {
        let old = unsafe { &*old_ptr };
        let new_capacity = (old.capacity() * 2) as usize;
        let new_buf = Buffer::new(new_capacity);
        let mut i = top;
        while i < bottom {
            unsafe {
                new_buf.write(i, old.read(i));
            }
            i += 1;
        }
        let new_ptr = Box::into_raw(Box::new(new_buf));
        let prior = self.shared.buffer.swap(new_ptr, Ordering::Release);
        // A concurrent stealer may have already loaded `prior` and be about
        // to read from it; park it instead of freeing, per the comment on
        // `retired_buffers`.
        self.shared.retired_buffers.lock().unwrap().push(prior);
    }

    /// Pops a job from the bottom of the deque. Returns `None` if empty,
    /// including the race against a concurrent stealer taking the last item.
    pub(crate) fn pop(&self) -> Option<OwnedJob> {
        let bottom = self.shared.bottom.load(Ordering::Relaxed);
        let new_bottom = bottom - 1;
        self.shared.bottom.store(new_bottom, Ordering::SeqCst);
        let top = self.shared.top.load(Ordering::SeqCst);

        if top > new_bottom {
            // Already empty; restore bottom.
            self.shared.bottom.store(bottom, Ordering::Relaxed);
            return None;
        }

        let buf_ptr = self.shared.buffer.load(Ordering::Relaxed);
        let buf = unsafe { &*buf_ptr };

        if top == new_bottom {
            // Exactly one item left: race a stealer for it via CAS on top.
            let job = unsafe { buf.read(new_bottom) };
            let won = self
                .shared
                .top
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.shared.bottom.store(bottom, Ordering::Relaxed);
            if won {
                Some(job)
            } else {
                std::mem::forget(job);
                None
            }
        } else {
            let job = unsafe { buf.read(new_bottom) };
            Some(job)
        }
    }

    /// Exact length, usable only by the owning thread (racy otherwise).
    pub(crate) fn len(&self) -> usize {
        let bottom = self.shared.bottom.load(Ordering::Relaxed);
        let top = self.shared.top.load(Ordering::Relaxed);
        (bottom - top).max(0) as usize
    }

    /// A handle other threads can use to steal from this deque.
    pub(crate) fn stealer(&self) -> Stealer {
        Stealer {
            shared: self.shared.clone(),
        }
    }
}

impl Stealer {
    /// Attempts to steal one job from the top of the deque.
    pub(crate) fn steal(&self) -> Steal {
        let top = self.shared.top.load(Ordering::Acquire);
        let bottom = self.shared.bottom.load(Ordering::Acquire);

        if top >= bottom {
            return Steal::Empty;
        }

        let buf_ptr = self.shared.buffer.load(Ordering::Acquire);
        let buf = unsafe { &*buf_ptr };
        let job = unsafe { buf.read(top) };

        match self
            .shared
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Steal::Success(job),
            Err(_) => {
                std::mem::forget(job);
                Steal::Retry
            }
        }
    }

    /// A rough, possibly-stale estimate of pending items, useful only for
    /// victim-selection heuristics, never for correctness decisions.
    pub(crate) fn approx_len(&self) -> usize {
        let top = self.shared.top.load(Ordering::Relaxed);
        let bottom = self.shared.bottom.load(Ordering::Relaxed);
        (bottom - top).max(0) as usize
    }

    /// Whether the deque looked empty at the moment of the call.
    pub(crate) fn is_empty(&self) -> bool {
        self.approx_len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;

    fn job(name: &str) -> OwnedJob {
        Box::new(FnJob::new(name, || Ok(())))
    }

    #[test]
    fn owner_push_pop_is_lifo() {
        let (owner, _stealer) = new(8);
        owner.push(job("a"));
        owner.push(job("b"));
        owner.push(job("c"));
        assert_eq!(owner.pop().unwrap().name(), "c");
        assert_eq!(owner.pop().unwrap().name(), "b");
        assert_eq!(owner.pop().unwrap().name(), "a");
        assert!(owner.pop().is_none());
    }

    #[test]
    fn stealer_takes_from_top_fifo_relative_to_pushes() {
        let (owner, stealer) = new(8);
        for i in 0..5 {
            owner.push(job(&format!("job{i}")));
        }
        match stealer.steal() {
            Steal::Success(j) => assert_eq!(j.name(), "job0"),
            _ => panic!("expected success"),
        }
        match stealer.steal() {
            Steal::Success(j) => assert_eq!(j.name(), "job1"),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn grows_past_initial_capacity_without_losing_items() {
        let (owner, _stealer) = new(4);
        for i in 0..100 {
            owner.push(job(&format!("job{i}")));
        }
        let mut popped = Vec::new();
        while let Some(j) = owner.pop() {
            popped.push(j.name().to_string());
        }
        assert_eq!(popped.len(), 100);
    }

    #[test]
    fn concurrent_steal_and_pop_conserve_every_item() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let (owner, stealer) = new(8);
        const N: usize = 2000;
        for i in 0..N {
            owner.push(job(&format!("job{i}")));
        }

        let counted = Arc::new(AtomicUsize::new(0));
        let thief_counted = counted.clone();
        let thief = std::thread::spawn(move || {
            let mut n = 0;
            loop {
                match stealer.steal() {
                    Steal::Success(_) => {
                        n += 1;
                        thief_counted.fetch_add(1, Ordering::SeqCst);
                    }
                    Steal::Retry => continue,
                    Steal::Empty => {
                        if n > 0 || stealer.is_empty() {
                            break;
                        }
                    }
                }
            }
        });

        let mut owner_count = 0;
        while let Some(_) = owner.pop() {
            owner_count += 1;
        }
        thief.join().unwrap();

        assert_eq!(owner_count + counted.load(Ordering::SeqCst), N);
    }
}
