//! C4: the mutex + condvar FIFO queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::capabilities::QueueCapabilities;
use crate::error::Error;
use crate::job::OwnedJob;

struct State {
    jobs: VecDeque<OwnedJob>,
    stopped: bool,
}

/// A FIFO job queue protected by a mutex and condvar (spec §4.3).
///
/// `size()`/`empty()` are exact and taken under the lock; `dequeue()` blocks
/// until work arrives or `stop_waiting()` is called.
pub struct MutexQueue {
    state: Mutex<State>,
    not_empty: Condvar,
}

impl Default for MutexQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexQueue {
    /// Creates an empty, running queue.
    pub fn new() -> Self {
        MutexQueue {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `job` and wakes one waiting consumer. Fails with
    /// `QueueStopped` once `stop_waiting()` has been called.
    pub fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::QueueStopped);
        }
        state.jobs.push_back(job);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a job is available or the queue is stopped. Returns
    /// `QueueEmpty` only once stopped with nothing left to drain.
    pub fn dequeue(&self) -> Result<OwnedJob, Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Ok(job);
            }
            if state.stopped {
                return Err(Error::QueueEmpty);
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Non-blocking dequeue: returns `QueueEmpty` immediately if nothing is
    /// ready, rather than waiting.
    pub fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        let mut state = self.state.lock().unwrap();
        state.jobs.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Atomically removes and returns every queued job, leaving the queue
    /// empty.
    pub fn drain(&self) -> Vec<OwnedJob> {
        let mut state = self.state.lock().unwrap();
        state.jobs.drain(..).collect()
    }

    /// Signals stop: wakes every blocked consumer; subsequent `enqueue`
    /// calls fail with `QueueStopped`. Idempotent.
    pub fn stop_waiting(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.not_empty.notify_all();
    }

    /// Whether `stop_waiting()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Exact current length, taken under the lock.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    /// Exact emptiness check, taken under the lock.
    pub fn empty(&self) -> bool {
        self.state.lock().unwrap().jobs.is_empty()
    }

    /// Static capability descriptor for this queue kind.
    pub fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::MUTEX
    }
}
