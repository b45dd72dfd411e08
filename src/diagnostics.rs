//! Execution-event ring, bottleneck analysis, and health check aggregation.
//! Field shapes carried from `original_source`'s `bottleneck_report.h` and
//! `health_status.h`; these were part of the original system's ambient
//! observability, so the event/bottleneck/health vocabulary is kept even
//! though no metrics *transport* is implemented here (spec non-goal: no
//! built-in exporter, callers wire `ExecutionEvent`/`HealthStatus` into
//! whatever they use).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::sink::now_iso8601;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One job lifecycle transition, suitable for serializing to the
/// execution-event JSON shape described in spec §6
/// (`{event_id, job_id, job_name, type, t_system_iso8601, thread_id,
/// worker_id, wait_ns, exec_ns, err?}`).
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub event_id: u64,
    pub job_id: u64,
    pub job_name: String,
    pub kind: ExecutionEventKind,
    pub at: Instant,
    pub t_system_iso8601: String,
    pub thread_id: String,
    pub worker_id: Option<usize>,
    /// Time spent queued before this event fired, if known.
    pub wait_ns: Option<u64>,
    /// Execution duration, set only on `Completed`/`Failed`.
    pub exec_ns: Option<u64>,
    pub err: Option<String>,
}

impl ExecutionEvent {
    /// Builds an event, stamping `event_id`/`at`/`t_system_iso8601`/
    /// `thread_id` from the calling context.
    pub fn new(job_id: u64, job_name: impl Into<String>, kind: ExecutionEventKind) -> Self {
        ExecutionEvent {
            event_id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            job_id,
            job_name: job_name.into(),
            kind,
            at: Instant::now(),
            t_system_iso8601: now_iso8601(),
            thread_id: format!("{:?}", std::thread::current().id()),
            worker_id: None,
            wait_ns: None,
            exec_ns: None,
            err: None,
        }
    }

    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait_ns = Some(wait.as_nanos() as u64);
        self
    }

    pub fn with_exec(mut self, exec: Duration) -> Self {
        self.exec_ns = Some(exec.as_nanos() as u64);
        self
    }

    pub fn with_err(mut self, err: impl Into<String>) -> Self {
        self.err = Some(err.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEventKind {
    Enqueued,
    Dequeued,
    Started,
    Completed,
    Failed,
    Cancelled,
    Retried,
}

/// Receives every [`ExecutionEvent`] synchronously, on the worker thread
/// that produced it. Spec §4.11: implementations must be non-blocking
/// (< ~1 us) since they run inline in the hot path.
pub trait DiagnosticListener: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// A fixed-capacity ring of the most recent [`ExecutionEvent`]s. Oldest
/// events are silently dropped once capacity is reached -- this is a
/// diagnostics aid, not an audit log (spec non-goal: no persistent queues).
pub struct EventRing {
    capacity: usize,
    events: Mutex<VecDeque<ExecutionEvent>>,
    dropped: AtomicU64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        EventRing {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Records `event`, evicting the oldest entry if at capacity.
    pub fn record(&self, event: ExecutionEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
    }

    /// A snapshot of every event currently retained, oldest first.
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Events evicted for capacity since this ring was created.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A named scheduling pathology the analyser can flag (spec §4.11;
/// `original_source`'s `bottleneck_report.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BottleneckKind {
    /// The queue is saturated relative to its nominal capacity.
    QueueFull,
    /// Jobs are waiting too long while workers stay busy: the pool can't
    /// drain the queue as fast as it fills.
    SlowConsumer,
    /// Workers are nearly fully utilised and the queue is still building up.
    WorkerStarvation,
    /// Work is landing disproportionately on a subset of workers.
    UnevenDistribution,
}

/// One analyser verdict, shaped after `original_source`'s `bottleneck_report`
/// (spec §4.11/§6/§11): a single pool-wide reading, not a per-worker finding.
/// `has_bottleneck` is `false` and `kind` is `None` when nothing crossed a
/// threshold; the metric fields are always populated so callers can chart
/// them regardless.
#[derive(Debug, Clone)]
pub struct BottleneckReport {
    pub has_bottleneck: bool,
    pub kind: Option<BottleneckKind>,
    pub description: String,
    /// `queue_depth / queue_capacity`, or `0.0` when the queue is unbounded.
    pub queue_saturation: f64,
    pub avg_wait_time_ms: f64,
    /// Mean fraction of wall-clock time workers spent executing a job,
    /// across `busy_ns / (busy_ns + idle_ns)` per worker.
    pub worker_utilization: f64,
    /// Queue depth divided by the pool's current throughput, estimating how
    /// long the backlog would take to drain at the present rate.
    pub estimated_backlog_time_ms: u64,
    /// Variance of per-worker utilisation, high when load is uneven.
    pub utilization_variance: f64,
    pub jobs_rejected: u64,
    pub queue_depth: usize,
    pub idle_workers: usize,
    pub total_workers: usize,
    pub recommendations: Vec<String>,
    pub detected_at: Instant,
}

impl BottleneckReport {
    /// 0-3 severity derived from saturation/utilisation, independent of
    /// which `kind` (if any) fired -- `original_source`'s `severity()`.
    pub fn severity(&self) -> u8 {
        if !self.has_bottleneck {
            return 0;
        }
        if self.queue_saturation > 0.95 || self.worker_utilization > 0.98 {
            3
        } else if self.queue_saturation > 0.8 || self.worker_utilization > 0.9 {
            2
        } else {
            1
        }
    }

    /// `severity()` rendered as the label `original_source` uses in logs.
    pub fn severity_label(&self) -> &'static str {
        match self.severity() {
            0 => "none",
            1 => "low",
            2 => "medium",
            _ => "critical",
        }
    }

    /// `true` once severity reaches the top of the scale.
    pub fn requires_immediate_action(&self) -> bool {
        self.severity() >= 3
    }
}

/// Per-worker counters the analyser needs to reason about utilisation and
/// distribution; callers assemble this from [`crate::worker::WorkerStats`]
/// plus whether the worker currently has a job in hand.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSample {
    pub worker_id: usize,
    pub jobs_executed: u64,
    pub busy_ns: u64,
    pub idle_ns: u64,
    pub currently_idle: bool,
}

impl WorkerSample {
    /// `busy_ns / (busy_ns + idle_ns)`, `0.0` for a worker with no tracked
    /// time yet.
    pub fn utilization(&self) -> f64 {
        let total = self.busy_ns + self.idle_ns;
        if total == 0 {
            0.0
        } else {
            self.busy_ns as f64 / total as f64
        }
    }
}

/// Everything [`BottleneckAnalyser::analyse`] needs beyond the per-worker
/// samples: the queue's current depth, its nominal capacity (`None` for an
/// unbounded queue), rejected-job count, and the average time recently
/// completed jobs spent waiting before they started.
#[derive(Debug, Clone)]
pub struct QueueSample {
    pub depth: usize,
    pub capacity: Option<usize>,
    pub jobs_rejected: u64,
    pub avg_wait_time_ms: f64,
    /// Mean recent per-job execution time, used to project
    /// `estimated_backlog_time_ms`.
    pub avg_exec_time_ms: f64,
}

/// Applies spec §4.11's diagnosis table to a pool's worker/queue samples,
/// producing one [`BottleneckReport`] (`original_source`'s
/// `bottleneck_analyzer::detect_bottlenecks`).
pub struct BottleneckAnalyser {
    /// `avg_wait_time_ms` above this, combined with high utilisation, is
    /// flagged as `SlowConsumer`.
    pub slow_consumer_wait_threshold_ms: f64,
    /// Per-worker utilisation variance above this is flagged as
    /// `UnevenDistribution`.
    pub variance_threshold: f64,
}

impl Default for BottleneckAnalyser {
    fn default() -> Self {
        BottleneckAnalyser {
            slow_consumer_wait_threshold_ms: 50.0,
            variance_threshold: 0.05,
        }
    }
}

impl BottleneckAnalyser {
    /// Evaluates `samples`/`queue`, returning the current bottleneck
    /// reading. Checks run in the order of spec §4.11's table and the
    /// first threshold crossed wins.
    pub fn analyse(&self, samples: &[WorkerSample], queue: &QueueSample) -> BottleneckReport {
        let total_workers = samples.len();
        let idle_workers = samples.iter().filter(|s| s.currently_idle).count();

        let queue_saturation = match queue.capacity {
            Some(capacity) if capacity > 0 => (queue.depth as f64 / capacity as f64).min(1.0),
            _ => 0.0,
        };

        let utilizations: Vec<f64> = samples.iter().map(WorkerSample::utilization).collect();
        let worker_utilization = if utilizations.is_empty() {
            0.0
        } else {
            utilizations.iter().sum::<f64>() / utilizations.len() as f64
        };
        let utilization_variance = if utilizations.is_empty() {
            0.0
        } else {
            utilizations
                .iter()
                .map(|u| (u - worker_utilization).powi(2))
                .sum::<f64>()
                / utilizations.len() as f64
        };

        let estimated_backlog_time_ms = if total_workers > 0 && queue.avg_exec_time_ms > 0.0 {
            (queue.depth as f64 * queue.avg_exec_time_ms / total_workers as f64) as u64
        } else {
            0
        };

        let mut kind = None;
        let mut description = String::new();

        if queue_saturation > 0.9 {
            kind = Some(BottleneckKind::QueueFull);
            description = format!("queue saturation at {:.0}%", queue_saturation * 100.0);
        } else if queue.avg_wait_time_ms > self.slow_consumer_wait_threshold_ms
            && worker_utilization > 0.9
        {
            kind = Some(BottleneckKind::SlowConsumer);
            description = format!(
                "average wait {:.1}ms with {:.0}% worker utilisation: consumers can't keep up",
                queue.avg_wait_time_ms,
                worker_utilization * 100.0
            );
        } else if worker_utilization > 0.95 && queue_saturation > 0.5 {
            kind = Some(BottleneckKind::WorkerStarvation);
            description = format!(
                "worker utilisation at {:.0}% with the queue still building up",
                worker_utilization * 100.0
            );
        } else if utilization_variance > self.variance_threshold {
            kind = Some(BottleneckKind::UnevenDistribution);
            description = format!(
                "per-worker utilisation variance at {utilization_variance:.3}: load is uneven"
            );
        }

        let has_bottleneck = kind.is_some();
        let recommendations = recommendations_for(kind, idle_workers, total_workers);

        BottleneckReport {
            has_bottleneck,
            kind,
            description,
            queue_saturation,
            avg_wait_time_ms: queue.avg_wait_time_ms,
            worker_utilization,
            estimated_backlog_time_ms,
            utilization_variance,
            jobs_rejected: queue.jobs_rejected,
            queue_depth: queue.depth,
            idle_workers,
            total_workers,
            recommendations,
            detected_at: Instant::now(),
        }
    }
}

fn recommendations_for(
    kind: Option<BottleneckKind>,
    idle_workers: usize,
    total_workers: usize,
) -> Vec<String> {
    match kind {
        None => Vec::new(),
        Some(BottleneckKind::QueueFull) => {
            vec!["raise the queue's capacity or add consumers".to_string()]
        }
        Some(BottleneckKind::SlowConsumer) => {
            vec!["jobs are taking longer than the arrival rate allows; profile job bodies or add workers".to_string()]
        }
        Some(BottleneckKind::WorkerStarvation) => {
            vec![format!(
                "add workers: only {idle_workers} of {total_workers} are ever idle"
            )]
        }
        Some(BottleneckKind::UnevenDistribution) => {
            vec!["check victim-selection and local-deque sizing; load isn't balancing".to_string()]
        }
    }
}

/// The health of one pool subsystem (queue, worker group, stealer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthState {
    /// Maps to the HTTP status a health endpoint should return
    /// (`original_source`'s `health_state_to_http_code`): `Healthy` and
    /// `Degraded` both still serve traffic (200); `Unhealthy` and `Unknown`
    /// don't (503).
    pub fn http_status(&self) -> u16 {
        match self {
            HealthState::Healthy | HealthState::Degraded => 200,
            HealthState::Unhealthy | HealthState::Unknown => 503,
        }
    }
}

/// One subsystem's reported health.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub state: HealthState,
    pub message: Option<String>,
}

/// The pool-wide health rollup: the worst of every component's state.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub overall: HealthState,
    pub components: Vec<ComponentHealth>,
    pub checked_at: Instant,
}

impl HealthStatus {
    /// Aggregates `components` into an overall status -- the least-healthy
    /// state wins, in `Unhealthy > Degraded > Unknown > Healthy` severity
    /// order.
    pub fn aggregate(components: Vec<ComponentHealth>) -> Self {
        let overall = components
            .iter()
            .map(|c| c.state)
            .fold(HealthState::Healthy, |acc, state| {
                severity_max(acc, state)
            });
        HealthStatus {
            overall,
            components,
            checked_at: Instant::now(),
        }
    }

    /// The HTTP status this rollup maps to.
    pub fn http_status(&self) -> u16 {
        self.overall.http_status()
    }
}

fn severity_rank(state: HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Unknown => 1,
        HealthState::Degraded => 2,
        HealthState::Unhealthy => 3,
    }
}

fn severity_max(a: HealthState, b: HealthState) -> HealthState {
    if severity_rank(b) > severity_rank(a) {
        b
    } else {
        a
    }
}

/// A recently-completed job, retained for the `recent_jobs` bound of
/// [`DiagnosticsSnapshot`].
#[derive(Debug, Clone)]
pub struct RecentJob {
    pub job_id: u64,
    pub job_name: String,
    pub worker_id: usize,
    pub succeeded: bool,
    pub exec_ns: u64,
}

/// A point-in-time read of everything [`Diagnostics`] tracks, returned by
/// [`crate::pool::Pool::diagnostics`] (spec §6: "thread dump, active jobs,
/// pending jobs (bounded), recent jobs (bounded), bottleneck report, health
/// status, event history (bounded)").
#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    pub events: Vec<ExecutionEvent>,
    pub recent_jobs: Vec<RecentJob>,
    pub events_dropped: u64,
    pub bottleneck: BottleneckReport,
    pub health: HealthStatus,
}

/// The pool-owned diagnostics facility (spec §3 `Diagnostics`): a bounded
/// event ring, a bounded recent-jobs ring, a synchronous listener set, and
/// the bottleneck/health analysers. One instance is shared (via `Arc`)
/// between the pool and every worker it starts.
pub struct Diagnostics {
    events: EventRing,
    recent_jobs: Mutex<VecDeque<RecentJob>>,
    recent_jobs_capacity: usize,
    listeners: Mutex<Vec<Arc<dyn DiagnosticListener>>>,
    analyser: BottleneckAnalyser,
    wait_ns_sum: AtomicU64,
    wait_count: AtomicU64,
}

impl Diagnostics {
    /// Creates a diagnostics facility with bounded rings of `event_capacity`
    /// and `recent_jobs_capacity` entries respectively.
    pub fn new(event_capacity: usize, recent_jobs_capacity: usize) -> Self {
        Diagnostics {
            events: EventRing::new(event_capacity),
            recent_jobs: Mutex::new(VecDeque::with_capacity(recent_jobs_capacity.max(1))),
            recent_jobs_capacity: recent_jobs_capacity.max(1),
            listeners: Mutex::new(Vec::new()),
            analyser: BottleneckAnalyser::default(),
            wait_ns_sum: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        }
    }

    /// Registers a listener to be called synchronously on every event,
    /// starting with the next one recorded.
    pub fn add_listener(&self, listener: Arc<dyn DiagnosticListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Records `event`, notifying every registered listener in order, then
    /// returns it to the caller so [`crate::worker::Worker`] can also fold
    /// it into the recent-jobs ring on terminal transitions. `Started`
    /// events feed the rolling `avg_wait_time_ms` the analyser reads.
    pub fn record(&self, event: ExecutionEvent) {
        if event.kind == ExecutionEventKind::Started {
            if let Some(wait_ns) = event.wait_ns {
                self.wait_ns_sum.fetch_add(wait_ns, Ordering::Relaxed);
                self.wait_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_event(&event);
        }
        self.events.record(event);
    }

    /// Folds a terminal (`Completed`/`Failed`) event into the bounded
    /// recent-jobs ring, evicting the oldest entry past capacity.
    pub fn record_recent_job(&self, job: RecentJob) {
        let mut recent = self.recent_jobs.lock().unwrap();
        if recent.len() >= self.recent_jobs_capacity {
            recent.pop_front();
        }
        recent.push_back(job);
    }

    /// The rolling mean of `Started` events' queued-before-start duration,
    /// in milliseconds; `0.0` until at least one has been recorded.
    pub fn avg_wait_time_ms(&self) -> f64 {
        let count = self.wait_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let sum = self.wait_ns_sum.load(Ordering::Relaxed);
        (sum as f64 / count as f64) / 1_000_000.0
    }

    /// The mean execution time of jobs still held in the recent-jobs ring,
    /// in milliseconds; `0.0` when the ring is empty.
    fn avg_exec_time_ms(&self) -> f64 {
        let recent = self.recent_jobs.lock().unwrap();
        if recent.is_empty() {
            return 0.0;
        }
        let sum: u64 = recent.iter().map(|j| j.exec_ns).sum();
        (sum as f64 / recent.len() as f64) / 1_000_000.0
    }

    /// A full snapshot: events, recent jobs, a freshly-computed bottleneck
    /// report from `samples`/`queue_depth`/`jobs_rejected`, and `health`.
    pub fn snapshot(
        &self,
        samples: &[WorkerSample],
        queue_depth: usize,
        queue_capacity: Option<usize>,
        jobs_rejected: u64,
        health: HealthStatus,
    ) -> DiagnosticsSnapshot {
        let queue = QueueSample {
            depth: queue_depth,
            capacity: queue_capacity,
            jobs_rejected,
            avg_wait_time_ms: self.avg_wait_time_ms(),
            avg_exec_time_ms: self.avg_exec_time_ms(),
        };
        DiagnosticsSnapshot {
            events: self.events.snapshot(),
            recent_jobs: self.recent_jobs.lock().unwrap().iter().cloned().collect(),
            events_dropped: self.events.dropped_count(),
            bottleneck: self.analyser.analyse(samples, &queue),
            health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = EventRing::new(2);
        for i in 0..5u64 {
            ring.record(ExecutionEvent::new(i, format!("job{i}"), ExecutionEventKind::Enqueued));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].job_id, 3);
        assert_eq!(snapshot[1].job_id, 4);
        assert_eq!(ring.dropped_count(), 3);
    }

    fn sample(worker_id: usize, busy_ns: u64, idle_ns: u64, currently_idle: bool) -> WorkerSample {
        WorkerSample {
            worker_id,
            jobs_executed: 0,
            busy_ns,
            idle_ns,
            currently_idle,
        }
    }

    #[test]
    fn queue_saturation_above_point_nine_flags_queue_full() {
        let analyser = BottleneckAnalyser::default();
        let samples = vec![sample(0, 50, 50, false)];
        let queue = QueueSample {
            depth: 95,
            capacity: Some(100),
            jobs_rejected: 0,
            avg_wait_time_ms: 1.0,
            avg_exec_time_ms: 1.0,
        };
        let report = analyser.analyse(&samples, &queue);
        assert!(report.has_bottleneck);
        assert_eq!(report.kind, Some(BottleneckKind::QueueFull));
        assert!(report.queue_saturation > 0.9);
    }

    #[test]
    fn slow_wait_with_busy_workers_flags_slow_consumer() {
        let analyser = BottleneckAnalyser::default();
        let samples = vec![sample(0, 99, 1, false), sample(1, 99, 1, false)];
        let queue = QueueSample {
            depth: 10,
            capacity: None,
            jobs_rejected: 0,
            avg_wait_time_ms: 200.0,
            avg_exec_time_ms: 5.0,
        };
        let report = analyser.analyse(&samples, &queue);
        assert_eq!(report.kind, Some(BottleneckKind::SlowConsumer));
    }

    #[test]
    fn near_saturated_workers_with_building_queue_flag_starvation() {
        let analyser = BottleneckAnalyser::default();
        let samples = vec![sample(0, 99, 1, false), sample(1, 99, 1, false)];
        let queue = QueueSample {
            depth: 60,
            capacity: Some(100),
            jobs_rejected: 0,
            avg_wait_time_ms: 1.0,
            avg_exec_time_ms: 1.0,
        };
        let report = analyser.analyse(&samples, &queue);
        assert_eq!(report.kind, Some(BottleneckKind::WorkerStarvation));
        assert!(report.requires_immediate_action());
    }

    #[test]
    fn skewed_utilisation_flags_uneven_distribution() {
        let analyser = BottleneckAnalyser::default();
        let samples = vec![sample(0, 100, 0, false), sample(1, 0, 100, true)];
        let queue = QueueSample {
            depth: 0,
            capacity: None,
            jobs_rejected: 0,
            avg_wait_time_ms: 0.0,
            avg_exec_time_ms: 0.0,
        };
        let report = analyser.analyse(&samples, &queue);
        assert_eq!(report.kind, Some(BottleneckKind::UnevenDistribution));
        assert_eq!(report.idle_workers, 1);
        assert_eq!(report.total_workers, 2);
    }

    #[test]
    fn quiet_pool_reports_no_bottleneck() {
        let analyser = BottleneckAnalyser::default();
        let samples = vec![sample(0, 10, 10, true), sample(1, 10, 10, true)];
        let queue = QueueSample {
            depth: 0,
            capacity: None,
            jobs_rejected: 0,
            avg_wait_time_ms: 0.0,
            avg_exec_time_ms: 0.0,
        };
        let report = analyser.analyse(&samples, &queue);
        assert!(!report.has_bottleneck);
        assert_eq!(report.severity(), 0);
        assert_eq!(report.severity_label(), "none");
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn health_aggregate_takes_the_worst_component() {
        let status = HealthStatus::aggregate(vec![
            ComponentHealth {
                name: "queue".into(),
                state: HealthState::Healthy,
                message: None,
            },
            ComponentHealth {
                name: "workers".into(),
                state: HealthState::Degraded,
                message: Some("2 of 8 idle".into()),
            },
        ]);
        assert_eq!(status.overall, HealthState::Degraded);
        assert_eq!(status.http_status(), 200);
    }

    #[test]
    fn healthy_overall_maps_to_200() {
        let status = HealthStatus::aggregate(vec![ComponentHealth {
            name: "queue".into(),
            state: HealthState::Healthy,
            message: None,
        }]);
        assert_eq!(status.http_status(), 200);
    }

    #[test]
    fn unhealthy_overall_maps_to_503() {
        let status = HealthStatus::aggregate(vec![
            ComponentHealth {
                name: "queue".into(),
                state: HealthState::Degraded,
                message: None,
            },
            ComponentHealth {
                name: "workers".into(),
                state: HealthState::Unhealthy,
                message: Some("no live workers".into()),
            },
        ]);
        assert_eq!(status.overall, HealthState::Unhealthy);
        assert_eq!(status.http_status(), 503);
    }

    struct CountingListener(std::sync::atomic::AtomicU64);

    impl DiagnosticListener for CountingListener {
        fn on_event(&self, _event: &ExecutionEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn diagnostics_notifies_listeners_and_bounds_both_rings() {
        let diagnostics = Diagnostics::new(2, 2);
        let listener = Arc::new(CountingListener(std::sync::atomic::AtomicU64::new(0)));
        diagnostics.add_listener(listener.clone());

        for i in 0..5u64 {
            diagnostics.record(ExecutionEvent::new(i, format!("job{i}"), ExecutionEventKind::Started));
            diagnostics.record_recent_job(RecentJob {
                job_id: i,
                job_name: format!("job{i}"),
                worker_id: 0,
                succeeded: true,
                exec_ns: 1_000,
            });
        }

        assert_eq!(listener.0.load(Ordering::Relaxed), 5);
        let snapshot = diagnostics.snapshot(&[], 0, None, 0, HealthStatus::aggregate(vec![]));
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.recent_jobs.len(), 2);
        assert_eq!(snapshot.events_dropped, 3);
    }

    #[test]
    fn avg_wait_time_tracks_started_events() {
        let diagnostics = Diagnostics::new(8, 8);
        diagnostics.record(
            ExecutionEvent::new(1, "job", ExecutionEventKind::Started)
                .with_wait(Duration::from_millis(10)),
        );
        diagnostics.record(
            ExecutionEvent::new(2, "job", ExecutionEventKind::Started)
                .with_wait(Duration::from_millis(30)),
        );
        assert!((diagnostics.avg_wait_time_ms() - 20.0).abs() < 0.001);
    }
}
