//! C10: worker lifecycle and the hybrid wait strategy.
//!
//! Workers deliberately never block on a condvar waiting for work. Spec §9
//! flags the C++ origin's nested "pool condvar wraps worker condvar" wait
//! path as a known deadlock hazard under a simultaneous stop-and-enqueue
//! race; the fix carried into this design is a hybrid spin-then-sleep loop
//! that always re-checks its own state, so there is exactly one place a
//! worker can be stuck: inside `Job::run`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::diagnostics::{Diagnostics, ExecutionEvent, ExecutionEventKind, RecentJob};
use crate::job::OwnedJob;
use crate::sync::deque::{self, Owner, Steal, Stealer};
use crate::sync::Injector;

/// The worker lifecycle state machine (spec §4.9): `Idle -> Active ->
/// Stopping -> Stopped`. Transitions only move forward; a stopped worker is
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl WorkerLifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerLifecycle::Idle,
            1 => WorkerLifecycle::Active,
            2 => WorkerLifecycle::Stopping,
            _ => WorkerLifecycle::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerLifecycle::Idle => 0,
            WorkerLifecycle::Active => 1,
            WorkerLifecycle::Stopping => 2,
            WorkerLifecycle::Stopped => 3,
        }
    }
}

/// A source of work a worker can attempt to steal from once its own local
/// deque runs dry. Implemented by [`crate::stealer::NumaWorkStealer`];
/// decoupled from it here so `worker` and `stealer` don't need to know
/// about each other's internals, only this one method.
pub trait StealSource: Send + Sync {
    /// Attempts to steal one job on behalf of `worker_id`. Returns `None`
    /// if nothing could be taken from any victim right now.
    fn try_steal_for(&self, worker_id: usize) -> Option<OwnedJob>;

    /// Attempts a batch steal on behalf of `worker_id` (spec §4.10). The
    /// first element is handed to the caller directly; any remainder is
    /// meant to be pushed onto the caller's own local deque. Default
    /// implementation falls back to a single-job steal.
    fn try_steal_batch_for(&self, worker_id: usize) -> Vec<OwnedJob> {
        self.try_steal_for(worker_id).into_iter().collect()
    }
}

/// No-op steal source, useful for single-worker pools or tests.
pub struct NoSteal;

impl StealSource for NoSteal {
    fn try_steal_for(&self, _worker_id: usize) -> Option<OwnedJob> {
        None
    }
}

/// Tuning for the hybrid wait strategy.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Number of empty poll iterations to busy-spin before sleeping.
    pub spin_limit: u32,
    /// Fixed sleep duration once the spin budget is exhausted.
    pub sleep_duration: Duration,
    /// Initial local deque capacity.
    pub deque_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            spin_limit: 200,
            sleep_duration: Duration::from_micros(500),
            deque_capacity: 32,
        }
    }
}

/// Per-worker counters exposed for diagnostics.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub jobs_stolen_from_others: u64,
    pub idle_spins: u64,
    pub busy_ns: u64,
    pub idle_ns: u64,
}

struct Counters {
    jobs_executed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_stolen_from_others: AtomicU64,
    idle_spins: AtomicU64,
    busy_ns: AtomicU64,
    idle_ns: AtomicU64,
}

/// One pool worker: an owned local deque, a handle other workers steal
/// from, and a state machine that a pool drives through start/stop.
pub struct Worker {
    id: usize,
    state: AtomicU8,
    immediate_stop: std::sync::atomic::AtomicBool,
    local: Owner,
    stealer: Stealer,
    injector: Arc<dyn Injector>,
    steal_source: Arc<dyn StealSource>,
    config: WorkerConfig,
    counters: Counters,
    started_at: Mutex<Option<Instant>>,
    diagnostics: Option<Arc<Diagnostics>>,
    current_job: Mutex<Option<(u64, String)>>,
    idle_since: Mutex<Instant>,
}

impl Worker {
    /// Builds a worker with a fresh local deque. Call [`Worker::stealer`]
    /// to register the returned handle with the pool's work-stealing
    /// coordinator before starting the worker.
    pub fn new(
        id: usize,
        injector: Arc<dyn Injector>,
        steal_source: Arc<dyn StealSource>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        Self::with_diagnostics(id, injector, steal_source, config, None)
    }

    /// As [`Worker::new`], additionally wiring a shared [`Diagnostics`]
    /// facility that every lifecycle transition is reported to.
    pub fn with_diagnostics(
        id: usize,
        injector: Arc<dyn Injector>,
        steal_source: Arc<dyn StealSource>,
        config: WorkerConfig,
        diagnostics: Option<Arc<Diagnostics>>,
    ) -> Arc<Self> {
        let (local, stealer) = deque::new(config.deque_capacity);
        Arc::new(Worker {
            id,
            state: AtomicU8::new(WorkerLifecycle::Idle.as_u8()),
            immediate_stop: std::sync::atomic::AtomicBool::new(false),
            local,
            stealer,
            injector,
            steal_source,
            config,
            counters: Counters {
                jobs_executed: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
                jobs_stolen_from_others: AtomicU64::new(0),
                idle_spins: AtomicU64::new(0),
                busy_ns: AtomicU64::new(0),
                idle_ns: AtomicU64::new(0),
            },
            started_at: Mutex::new(None),
            diagnostics,
            current_job: Mutex::new(None),
            idle_since: Mutex::new(Instant::now()),
        })
    }

    /// This worker's pool-assigned index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// A handle for other workers (or the coordinator) to steal from this
    /// worker's local deque.
    pub fn stealer(&self) -> Stealer {
        self.stealer.clone()
    }

    /// Submits a job directly onto this worker's local deque, bypassing the
    /// shared injector. Intended for the worker's own thread (e.g. a job
    /// spawning a child job); other callers should go through the pool's
    /// injector instead.
    pub fn push_local(&self, job: OwnedJob) {
        self.local.push(job);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerLifecycle {
        WorkerLifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Requests a graceful stop: the worker drains its local deque before
    /// exiting its loop. Idempotent.
    pub fn request_stop(&self) {
        self.transition_to_stopping();
    }

    /// Requests an immediate stop: the worker finishes whatever job it is
    /// currently running, if any, but does not drain its remaining local
    /// deque -- those jobs are left in place for a pool-level drain/reassign
    /// step instead. Idempotent.
    pub fn request_stop_immediate(&self) {
        self.immediate_stop.store(true, Ordering::Release);
        self.transition_to_stopping();
    }

    fn transition_to_stopping(&self) {
        let _ = self.state.compare_exchange(
            WorkerLifecycle::Active.as_u8(),
            WorkerLifecycle::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        let _ = self.state.compare_exchange(
            WorkerLifecycle::Idle.as_u8(),
            WorkerLifecycle::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Drains and returns every job still sitting in this worker's local
    /// deque. Meant to be called by the pool after an immediate stop, to
    /// reassign orphaned work.
    pub fn drain_local(&self) -> Vec<OwnedJob> {
        let mut drained = Vec::new();
        while let Some(job) = self.local.pop() {
            drained.push(job);
        }
        drained
    }

    /// Spawns the OS thread running this worker's main loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = self.clone();
        thread::Builder::new()
            .name(format!("jobcore-worker-{}", worker.id))
            .spawn(move || worker.run())
            .expect("failed to spawn worker thread")
    }

    fn run(self: &Arc<Self>) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.state
            .store(WorkerLifecycle::Active.as_u8(), Ordering::Release);
        log::debug!("worker {} started", self.id);

        let mut spins = 0u32;
        loop {
            if self.state() == WorkerLifecycle::Stopping {
                if self.immediate_stop.load(Ordering::Acquire) {
                    break;
                }
                // Drain the local deque before exiting so no owned work is
                // silently dropped.
                if let Some(mut job) = self.local.pop() {
                    self.execute(&mut job);
                    continue;
                }
                break;
            }

            match self.next_job() {
                Some(mut job) => {
                    spins = 0;
                    self.execute(&mut job);
                }
                None => {
                    spins += 1;
                    self.counters.idle_spins.fetch_add(1, Ordering::Relaxed);
                    if spins < self.config.spin_limit {
                        std::hint::spin_loop();
                    } else {
                        thread::sleep(self.config.sleep_duration);
                    }
                }
            }
        }

        self.state
            .store(WorkerLifecycle::Stopped.as_u8(), Ordering::Release);
        log::debug!("worker {} stopped", self.id);
    }

    fn next_job(&self) -> Option<OwnedJob> {
        if let Some(job) = self.local.pop() {
            return Some(job);
        }
        if let Ok(job) = self.injector.try_dequeue() {
            return Some(job);
        }
        let mut stolen = self.steal_source.try_steal_batch_for(self.id);
        if !stolen.is_empty() {
            let first = stolen.remove(0);
            let extra = stolen.len();
            for job in stolen {
                self.local.push(job);
            }
            self.counters
                .jobs_stolen_from_others
                .fetch_add(1 + extra as u64, Ordering::Relaxed);
            return Some(first);
        }
        None
    }

    fn execute(&self, job: &mut OwnedJob) {
        let job_id = job.id();
        let job_name = job.name().to_string();
        let wait = job.enqueued_at().elapsed();
        let idle_elapsed = self.idle_since.lock().unwrap().elapsed();
        self.counters
            .idle_ns
            .fetch_add(idle_elapsed.as_nanos() as u64, Ordering::Relaxed);
        *self.current_job.lock().unwrap() = Some((job_id, job_name.clone()));

        self.emit(
            ExecutionEvent::new(job_id, job_name.clone(), ExecutionEventKind::Started)
                .with_worker(self.id)
                .with_wait(wait),
        );

        if let Some(token) = job.cancellation() {
            if token.is_cancelled() {
                self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    ExecutionEvent::new(job_id, job_name.clone(), ExecutionEventKind::Cancelled)
                        .with_worker(self.id),
                );
                self.finish_job(job_id, job_name, false, Duration::ZERO);
                return;
            }
        }

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
        let exec = started.elapsed();
        self.counters
            .busy_ns
            .fetch_add(exec.as_nanos() as u64, Ordering::Relaxed);
        match result {
            Ok(Ok(())) => {
                self.counters.jobs_executed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    ExecutionEvent::new(job_id, job_name.clone(), ExecutionEventKind::Completed)
                        .with_worker(self.id)
                        .with_exec(exec),
                );
                self.finish_job(job_id, job_name, true, exec);
            }
            Ok(Err(err)) => {
                self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    ExecutionEvent::new(job_id, job_name.clone(), ExecutionEventKind::Failed)
                        .with_worker(self.id)
                        .with_exec(exec)
                        .with_err(err.to_string()),
                );
                self.finish_job(job_id, job_name, false, exec);
            }
            Err(panic) => {
                self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
                let cause = panic_message(&panic);
                log::error!("job '{job_name}' panicked on worker {}: {cause}", self.id);
                self.emit(
                    ExecutionEvent::new(job_id, job_name.clone(), ExecutionEventKind::Failed)
                        .with_worker(self.id)
                        .with_exec(exec)
                        .with_err(cause),
                );
                self.finish_job(job_id, job_name, false, exec);
            }
        }
        *self.current_job.lock().unwrap() = None;
        *self.idle_since.lock().unwrap() = Instant::now();
    }

    fn finish_job(&self, job_id: u64, job_name: String, succeeded: bool, exec: Duration) {
        if let Some(diagnostics) = self.diagnostics.as_ref() {
            diagnostics.record_recent_job(RecentJob {
                job_id,
                job_name,
                worker_id: self.id,
                succeeded,
                exec_ns: exec.as_nanos() as u64,
            });
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(diagnostics) = self.diagnostics.as_ref() {
            diagnostics.record(event);
        }
    }

    /// The job id/name this worker is currently running, if any.
    pub fn active_job(&self) -> Option<(u64, String)> {
        self.current_job.lock().unwrap().clone()
    }

    /// How long this worker has been without a job to run.
    pub fn idle_time(&self) -> Duration {
        self.idle_since.lock().unwrap().elapsed()
    }

    /// Snapshot of this worker's counters.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            jobs_executed: self.counters.jobs_executed.load(Ordering::Relaxed),
            jobs_failed: self.counters.jobs_failed.load(Ordering::Relaxed),
            jobs_stolen_from_others: self
                .counters
                .jobs_stolen_from_others
                .load(Ordering::Relaxed),
            idle_spins: self.counters.idle_spins.load(Ordering::Relaxed),
            busy_ns: self.counters.busy_ns.load(Ordering::Relaxed),
            idle_ns: self.counters.idle_ns.load(Ordering::Relaxed),
        }
    }

    /// Rough pending-work estimate for this worker's local deque, used by
    /// victim-selection heuristics.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use crate::sync::mutex_queue::MutexQueue;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn worker_drains_injector_then_stops_on_request() {
        let injector: Arc<dyn Injector> = Arc::new(MutexQueue::new());
        let executed = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let executed = executed.clone();
            injector
                .enqueue(Box::new(FnJob::new(format!("job{i}"), move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })))
                .unwrap();
        }

        let worker = Worker::new(0, injector, Arc::new(NoSteal), WorkerConfig::default());
        let handle = worker.spawn();

        // Give the worker time to drain all five, then ask it to stop.
        std::thread::sleep(Duration::from_millis(50));
        worker.request_stop();
        handle.join().unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 5);
        assert_eq!(worker.state(), WorkerLifecycle::Stopped);
    }

    #[test]
    fn panicking_job_is_contained_and_counted_as_failed() {
        let injector: Arc<dyn Injector> = Arc::new(MutexQueue::new());
        injector
            .enqueue(Box::new(FnJob::new("boom", || panic!("job blew up"))))
            .unwrap();

        let worker = Worker::new(0, injector, Arc::new(NoSteal), WorkerConfig::default());
        let handle = worker.spawn();
        std::thread::sleep(Duration::from_millis(30));
        worker.request_stop();
        handle.join().unwrap();

        assert_eq!(worker.stats().jobs_failed, 1);
    }
}
