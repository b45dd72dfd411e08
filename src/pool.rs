//! C11: the pool lifecycle -- `PoolBuilder` assembles workers and a
//! work-stealing coordinator around a caller-chosen injector queue;
//! `Pool::start`/`Pool::stop` drive every worker through its state machine
//! with a single CAS-guarded transition (spec §4.9/§4.11).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::diagnostics::{
    ComponentHealth, Diagnostics, DiagnosticsSnapshot, HealthState, HealthStatus, WorkerSample,
};
use crate::error::Error;
use crate::job::OwnedJob;
use crate::priority::Priority;
use crate::sink::{MetricValue, MetricsSink, NullMetricsSink};
use crate::stealer::{BackoffConfig, BatchStealConfig, NumaWorkStealer, VictimSelectionPolicy};
use crate::sync::typed_queue::TypedQueue;
use crate::sync::Injector;
use crate::worker::{Worker, WorkerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum PoolState {
    NotStarted = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::NotStarted,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }
}

/// Configuration snapshotted by [`PoolBuilder::build`]; see spec §10.3 --
/// there is deliberately no `reconfigure()`, a running pool's shape is
/// fixed once built.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub title: String,
    pub num_workers: usize,
    pub worker_config: WorkerConfig,
    pub victim_policy: VictimSelectionPolicy,
    pub backoff: BackoffConfig,
    pub batch_steal: BatchStealConfig,
    /// Capacity of the diagnostics event ring (spec §3 `Diagnostics`).
    pub event_capacity: usize,
    /// Capacity of the diagnostics recent-jobs ring.
    pub recent_jobs_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            title: "jobcore".to_string(),
            num_workers: num_cpus::get().max(1),
            worker_config: WorkerConfig::default(),
            victim_policy: VictimSelectionPolicy::RoundRobin,
            backoff: BackoffConfig::default(),
            batch_steal: BatchStealConfig::default(),
            event_capacity: 1024,
            recent_jobs_capacity: 256,
        }
    }
}

/// Builds a [`Pool`] over an injector queue `Q`. Every setting has a
/// sensible default; call only the setters you need.
pub struct PoolBuilder<Q: Injector + 'static> {
    queue: Arc<Q>,
    config: PoolConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<Q: Injector + 'static> PoolBuilder<Q> {
    /// Starts a builder around an already-constructed injector queue.
    pub fn new(queue: Arc<Q>) -> Self {
        PoolBuilder {
            queue,
            config: PoolConfig::default(),
            metrics: Arc::new(NullMetricsSink),
        }
    }

    /// Sets the pool's title, used as the `pool.<title>.*` prefix in every
    /// metric this pool emits (spec §6).
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = title.into();
        self
    }

    /// Overrides the worker count (defaults to the detected CPU count).
    pub fn num_workers(mut self, n: usize) -> Self {
        self.config.num_workers = n.max(1);
        self
    }

    /// Overrides per-worker spin/sleep/deque tuning.
    pub fn worker_config(mut self, config: WorkerConfig) -> Self {
        self.config.worker_config = config;
        self
    }

    /// Overrides the work-stealing victim selection policy.
    pub fn victim_policy(mut self, policy: VictimSelectionPolicy) -> Self {
        self.config.victim_policy = policy;
        self
    }

    /// Overrides the steal-failure backoff configuration.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Overrides batch-steal sizing (spec §4.10).
    pub fn batch_steal(mut self, batch_steal: BatchStealConfig) -> Self {
        self.config.batch_steal = batch_steal;
        self
    }

    /// Overrides the diagnostics event/recent-jobs ring capacities.
    pub fn diagnostics_capacity(mut self, event_capacity: usize, recent_jobs_capacity: usize) -> Self {
        self.config.event_capacity = event_capacity;
        self.config.recent_jobs_capacity = recent_jobs_capacity;
        self
    }

    /// Wires a [`MetricsSink`] the pool reports counters/gauges/histograms
    /// to (spec §6). Defaults to [`NullMetricsSink`].
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Freezes the configuration and assembles a not-yet-started pool.
    pub fn build(self) -> Pool<Q> {
        let coordinator = Arc::new(NumaWorkStealer::with_batch_config(
            self.config.num_workers,
            self.config.victim_policy,
            self.config.backoff,
            self.config.batch_steal,
        ));
        let diagnostics = Arc::new(Diagnostics::new(
            self.config.event_capacity,
            self.config.recent_jobs_capacity,
        ));
        Pool {
            queue: self.queue,
            coordinator,
            workers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            state: AtomicU8::new(PoolState::NotStarted as u8),
            started_at: Mutex::new(None),
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            diagnostics,
            metrics: self.metrics,
            config: self.config,
            _queue_type: PhantomData,
        }
    }
}

/// A running (or not-yet-started) group of worker threads sharing one
/// injector queue and one work-stealing coordinator.
pub struct Pool<Q: Injector + 'static> {
    queue: Arc<Q>,
    coordinator: Arc<NumaWorkStealer>,
    workers: Mutex<Vec<Arc<Worker>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    state: AtomicU8,
    started_at: Mutex<Option<Instant>>,
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_rejected: AtomicU64,
    diagnostics: Arc<Diagnostics>,
    metrics: Arc<dyn MetricsSink>,
    config: PoolConfig,
    _queue_type: PhantomData<Q>,
}

impl<Q: Injector + 'static> Pool<Q> {
    /// Starts every configured worker thread. Fails with `AlreadyStarted`
    /// if called more than once.
    pub fn start(&self) -> Result<(), Error> {
        self.state
            .compare_exchange(
                PoolState::NotStarted as u8,
                PoolState::Running as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map_err(|_| Error::AlreadyStarted)?;

        let mut workers = self.workers.lock().unwrap();
        let mut handles = self.handles.lock().unwrap();
        for id in 0..self.config.num_workers {
            let worker = Worker::with_diagnostics(
                id,
                self.queue.clone() as Arc<dyn Injector>,
                self.coordinator.clone(),
                self.config.worker_config,
                Some(self.diagnostics.clone()),
            );
            self.coordinator.register(id, worker.stealer());
            handles.push(worker.spawn());
            workers.push(worker);
        }
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.metrics.observe(
            &format!("pool.{}.workers.total", self.config.title),
            MetricValue::Gauge(self.config.num_workers as f64),
        );
        log::info!(
            "pool '{}' started with {} workers",
            self.config.title,
            self.config.num_workers
        );
        Ok(())
    }

    /// Adds one more worker to an already-running pool, registering it with
    /// the existing work-stealing coordinator.
    ///
    /// # Panics
    /// Panics if the pool was built with a worker count that leaves no
    /// coordinator slot free; build with headroom if you expect to grow.
    pub fn add_worker(&self) -> Result<(), Error> {
        if self.state() != PoolState::Running {
            return Err(Error::NotStarted);
        }
        let mut workers = self.workers.lock().unwrap();
        let mut handles = self.handles.lock().unwrap();
        let id = workers.len();
        let worker = Worker::with_diagnostics(
            id,
            self.queue.clone() as Arc<dyn Injector>,
            self.coordinator.clone(),
            self.config.worker_config,
            Some(self.diagnostics.clone()),
        );
        self.coordinator.register(id, worker.stealer());
        handles.push(worker.spawn());
        workers.push(worker);
        self.metrics.observe(
            &format!("pool.{}.workers.total", self.config.title),
            MetricValue::Gauge(workers.len() as f64),
        );
        Ok(())
    }

    /// Adds `n` more workers; see [`Pool::add_worker`].
    pub fn add_workers(&self, n: usize) -> Result<(), Error> {
        for _ in 0..n {
            self.add_worker()?;
        }
        Ok(())
    }

    /// Submits one job to the shared injector queue.
    pub fn enqueue(&self, job: OwnedJob) -> Result<(), Error> {
        if self.state() != PoolState::Running {
            self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NotStarted);
        }
        match self.queue.enqueue(job) {
            Ok(()) => {
                self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
                self.metrics.observe(
                    &format!("pool.{}.jobs.submitted", self.config.title),
                    MetricValue::Counter(1),
                );
                Ok(())
            }
            Err(err) => {
                self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                self.metrics.observe(
                    &format!("pool.{}.jobs.rejected", self.config.title),
                    MetricValue::Counter(1),
                );
                Err(err)
            }
        }
    }

    /// Submits every job in `jobs`, stopping at the first failure (already
    ///-submitted jobs are not rolled back).
    pub fn enqueue_batch(&self, jobs: Vec<OwnedJob>) -> Result<(), Error> {
        for job in jobs {
            self.enqueue(job)?;
        }
        Ok(())
    }

    /// Stops the pool. `immediate = false` lets each worker finish its
    /// current job and drain its local deque; `immediate = true` stops each
    /// worker as soon as its current job (if any) completes, leaving any
    /// remaining local-deque jobs undrained (reclaimable via
    /// [`Worker::drain_local`] if the caller needs them). Either way, new
    /// `enqueue` calls are rejected immediately.
    pub fn stop(&self, immediate: bool) -> Result<(), Error> {
        self.state
            .compare_exchange(
                PoolState::Running as u8,
                PoolState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map_err(|_| Error::NotStarted)?;

        log::info!("pool '{}' stopping (immediate={immediate})", self.config.title);
        self.queue.stop_waiting();
        let workers = self.workers.lock().unwrap();
        for worker in workers.iter() {
            if immediate {
                worker.request_stop_immediate();
            } else {
                worker.request_stop();
            }
        }
        drop(workers);

        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        drop(handles);

        for stats in self.worker_stats() {
            self.jobs_completed.fetch_add(stats.jobs_executed, Ordering::Relaxed);
            self.jobs_failed.fetch_add(stats.jobs_failed, Ordering::Relaxed);
        }
        self.metrics.observe(
            &format!("pool.{}.jobs.completed", self.config.title),
            MetricValue::Counter(self.jobs_completed.load(Ordering::Relaxed)),
        );
        self.metrics.observe(
            &format!("pool.{}.jobs.failed", self.config.title),
            MetricValue::Counter(self.jobs_failed.load(Ordering::Relaxed)),
        );

        self.state.store(PoolState::Stopped as u8, Ordering::Release);
        Ok(())
    }

    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the pool is currently accepting work.
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Time since [`Pool::start`] was called, or `None` if not started yet.
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.lock().unwrap().map(|t| t.elapsed())
    }

    /// Total jobs accepted via `enqueue`/`enqueue_batch` since start.
    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    /// Total jobs that ran to completion, aggregated from worker stats at
    /// the most recent [`Pool::stop`].
    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    /// Total jobs that failed (error or panic), aggregated at the most
    /// recent [`Pool::stop`].
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Total enqueue attempts rejected because the pool wasn't running.
    pub fn jobs_rejected(&self) -> u64 {
        self.jobs_rejected.load(Ordering::Relaxed)
    }

    /// The configured worker count (not necessarily the live count after
    /// `add_worker` calls).
    pub fn configured_workers(&self) -> usize {
        self.config.num_workers
    }

    /// The live worker count, including any added via `add_worker`.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// A snapshot of every worker's counters, in worker-id order.
    pub fn worker_stats(&self) -> Vec<crate::worker::WorkerStats> {
        self.workers.lock().unwrap().iter().map(|w| w.stats()).collect()
    }

    /// The work-stealing coordinator's running totals.
    pub fn stealing_stats(&self) -> crate::stealer::WorkStealingStats {
        self.coordinator.stats()
    }

    /// A point-in-time diagnostics read: event history, recent jobs,
    /// bottleneck findings, and health -- spec §6's thread-dump-adjacent
    /// introspection surface.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let samples: Vec<WorkerSample> = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|w| {
                let stats = w.stats();
                WorkerSample {
                    worker_id: w.id(),
                    jobs_executed: stats.jobs_executed,
                    busy_ns: stats.busy_ns,
                    idle_ns: stats.idle_ns,
                    currently_idle: w.active_job().is_none(),
                }
            })
            .collect();
        self.diagnostics.snapshot(
            &samples,
            self.queue.approximate_len(),
            None, // every injector this crate ships is unbounded; no nominal capacity to report
            self.jobs_rejected(),
            self.health(),
        )
    }

    /// Rolls up queue/worker-group/stealer health into one status (spec
    /// §6 `health_status`).
    pub fn health(&self) -> HealthStatus {
        let queue_state = match self.state() {
            PoolState::NotStarted => HealthState::Unknown,
            PoolState::Running => HealthState::Healthy,
            PoolState::Stopping => HealthState::Degraded,
            PoolState::Stopped => HealthState::Unhealthy,
        };
        let worker_count = self.worker_count();
        let workers_state = match self.state() {
            PoolState::NotStarted => HealthState::Unknown,
            PoolState::Running if worker_count == 0 => HealthState::Unhealthy,
            PoolState::Running => HealthState::Healthy,
            PoolState::Stopping => HealthState::Degraded,
            PoolState::Stopped => HealthState::Unhealthy,
        };
        HealthStatus::aggregate(vec![
            ComponentHealth {
                name: "queue".to_string(),
                state: queue_state,
                message: None,
            },
            ComponentHealth {
                name: "workers".to_string(),
                state: workers_state,
                message: Some(format!("{worker_count} workers registered")),
            },
        ])
    }
}

impl Pool<TypedQueue> {
    /// Convenience constructor for the common case: a priority-partitioned
    /// injector with default pool settings.
    pub fn with_typed_queue() -> Pool<TypedQueue> {
        PoolBuilder::new(Arc::new(TypedQueue::new())).build()
    }

    /// Submits `job` at an explicit priority, bypassing the generic
    /// [`Injector::enqueue`] (which defaults every job to
    /// [`Priority::Batch`]).
    pub fn enqueue_with_priority(&self, priority: Priority, job: OwnedJob) -> Result<(), Error> {
        if !self.is_running() {
            self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NotStarted);
        }
        self.queue.enqueue(priority, job)?;
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.metrics.observe(
            &format!("pool.{}.jobs.submitted", self.config.title),
            MetricValue::Counter(1),
        );
        Ok(())
    }
}

impl<Q: Injector + 'static> Drop for Pool<Q> {
    fn drop(&mut self) {
        if self.state() == PoolState::Running {
            let _ = self.stop(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnJob;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn start_enqueue_stop_runs_every_job_exactly_once() {
        let pool = Pool::with_typed_queue();
        pool.start().unwrap();

        let executed = StdArc::new(AtomicUsize::new(0));
        for i in 0..1000 {
            let executed = executed.clone();
            pool.enqueue(Box::new(FnJob::new(format!("job{i}"), move || {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        }

        // Give workers a generous window to drain before a graceful stop.
        std::thread::sleep(Duration::from_millis(200));
        pool.stop(false).unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn double_start_is_rejected() {
        let pool = Pool::with_typed_queue();
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(Error::AlreadyStarted)));
        pool.stop(false).unwrap();
    }

    #[test]
    fn enqueue_before_start_is_rejected() {
        let pool = Pool::with_typed_queue();
        assert!(matches!(
            pool.enqueue(Box::new(FnJob::new("x", || Ok(())))),
            Err(Error::NotStarted)
        ));
    }

    #[test]
    fn priority_enqueue_respects_ordering_under_single_worker() {
        let pool = PoolBuilder::new(Arc::new(TypedQueue::new()))
            .num_workers(1)
            .build();
        pool.start().unwrap();

        let order = StdArc::new(Mutex::new(Vec::new()));
        // Submit while the single worker is presumably idle-spinning; not
        // deterministic, but exercises the priority path end-to-end.
        for (name, priority) in [
            ("bg", Priority::Background),
            ("rt", Priority::RealTime),
            ("batch", Priority::Batch),
        ] {
            let order = order.clone();
            pool.enqueue_with_priority(
                priority,
                Box::new(FnJob::new(name, move || {
                    order.lock().unwrap().push(name.to_string());
                    Ok(())
                })),
            )
            .unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        pool.stop(false).unwrap();
        assert_eq!(order.lock().unwrap().len(), 3);
    }

    #[test]
    fn health_is_unknown_before_start_and_healthy_while_running() {
        let pool = Pool::with_typed_queue();
        assert_eq!(pool.health().overall, HealthState::Unknown);
        pool.start().unwrap();
        assert_eq!(pool.health().overall, HealthState::Healthy);
        pool.stop(false).unwrap();
        assert_eq!(pool.health().overall, HealthState::Unhealthy);
    }

    #[test]
    fn diagnostics_snapshot_reflects_completed_jobs() {
        let pool = Pool::with_typed_queue();
        pool.start().unwrap();
        for i in 0..10 {
            pool.enqueue(Box::new(FnJob::new(format!("job{i}"), || Ok(()))))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        let snapshot = pool.diagnostics();
        pool.stop(false).unwrap();

        assert!(!snapshot.events.is_empty());
        assert!(!snapshot.recent_jobs.is_empty());
    }

    #[test]
    fn metrics_sink_observes_submission_and_completion() {
        let metrics = StdArc::new(crate::sink::VecMetricsSink::new());
        let pool = PoolBuilder::new(StdArc::new(TypedQueue::new()))
            .num_workers(2)
            .metrics(metrics.clone())
            .build();
        pool.start().unwrap();
        pool.enqueue(Box::new(FnJob::new("x", || Ok(())))).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pool.stop(false).unwrap();

        let observed = metrics.snapshot();
        assert!(observed.iter().any(|(name, _)| name.ends_with("jobs.submitted")));
        assert!(observed.iter().any(|(name, _)| name.ends_with("jobs.completed")));
        assert_eq!(pool.jobs_completed(), 1);
    }

    #[test]
    fn rejected_enqueue_after_stop_is_counted() {
        let pool = Pool::with_typed_queue();
        pool.start().unwrap();
        pool.stop(false).unwrap();
        assert!(pool
            .enqueue(Box::new(FnJob::new("late", || Ok(()))))
            .is_err());
        assert_eq!(pool.jobs_rejected(), 1);
    }
}
