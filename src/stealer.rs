//! C12: the work-stealing coordinator (spec §3/§4.10). Victim-selection
//! policy names, the backoff calculator's shape and defaults, and the
//! cooperation-matrix formula are carried from `original_source`'s
//! `numa_work_stealer.h`, `steal_backoff_strategy.h` and
//! `work_affinity_tracker.h`.
//!
//! True NUMA topology detection has no portable cross-platform crate in
//! this stack; every worker is treated as belonging to a single node
//! (`node_of` always returns `0`). `NumaAware`/`LocalityAware`/
//! `Hierarchical` policies still exist and still consult the affinity
//! tracker, they just can't express a real node boundary today -- see
//! DESIGN.md.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::job::OwnedJob;
use crate::sync::deque::{Steal, Stealer};
use crate::worker::StealSource;

/// How a thief picks which victim to try next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimSelectionPolicy {
    /// Pick a uniformly random victim each attempt.
    Random,
    /// Cycle through victims in a fixed rotation, one step per attempt.
    RoundRobin,
    /// Weight victims by their last-observed local queue length.
    Adaptive,
    /// Prefer same-node victims first, per [`NumaWorkStealer::node_of`].
    NumaAware,
    /// Prefer victims this thief has successfully stolen from before.
    LocalityAware,
    /// `NumaAware` first, falling back to `LocalityAware` among same-node
    /// candidates.
    Hierarchical,
}

/// The shape of the backoff delay applied between failed full steal
/// rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    AdaptiveJitter,
}

impl BackoffStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::AdaptiveJitter => "adaptive_jitter",
        }
    }
}

/// Tuning for [`BackoffCalculator`], defaulted from
/// `original_source/stealing/steal_backoff_strategy.h`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            strategy: BackoffStrategy::Exponential,
            initial_backoff: Duration::from_micros(50),
            max_backoff: Duration::from_micros(1000),
            multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

/// Computes how long a thief should back off after `attempt` consecutive
/// empty steal rounds.
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        BackoffCalculator { config }
    }

    fn calculate_base_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.initial_backoff;
        match self.config.strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear => initial * attempt.max(1),
            BackoffStrategy::Exponential | BackoffStrategy::AdaptiveJitter => {
                let factor = self.config.multiplier.powi(attempt.min(20) as i32);
                Duration::from_secs_f64((initial.as_secs_f64() * factor).max(0.0))
            }
        }
    }

    fn cap_delay(&self, delay: Duration) -> Duration {
        delay.min(self.config.max_backoff)
    }

    fn apply_jitter(&self, delay: Duration, rng: &mut SmallRng) -> Duration {
        if self.config.strategy != BackoffStrategy::AdaptiveJitter || self.config.jitter_factor <= 0.0
        {
            return delay;
        }
        let jitter_range = delay.as_secs_f64() * self.config.jitter_factor;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    /// The full delay for `attempt`, including cap and (for
    /// `AdaptiveJitter`) randomized jitter.
    pub fn calculate(&self, attempt: u32, rng: &mut SmallRng) -> Duration {
        let base = self.calculate_base_delay(attempt);
        self.apply_jitter(self.cap_delay(base), rng)
    }
}

/// Tracks how often each ordered pair of workers has cooperated
/// (successfully stolen from one another), as a flattened upper-triangular
/// matrix of atomic counters -- `original_source`'s
/// `work_affinity_tracker.h` avoids an O(n^2) allocation for the (rare)
/// symmetric half; we do the same.
pub struct WorkAffinityTracker {
    worker_count: usize,
    cooperation: Vec<AtomicU64>,
}

impl WorkAffinityTracker {
    pub fn new(worker_count: usize) -> Self {
        let cells = matrix_cells(worker_count);
        let mut cooperation = Vec::with_capacity(cells);
        for _ in 0..cells {
            cooperation.push(AtomicU64::new(0));
        }
        WorkAffinityTracker {
            worker_count,
            cooperation,
        }
    }

    fn index(&self, mut i: usize, mut j: usize) -> usize {
        if i > j {
            std::mem::swap(&mut i, &mut j);
        }
        let n = self.worker_count as isize;
        let (i, j) = (i as isize, j as isize);
        (i * n - i * (i + 1) / 2 + j - i - 1) as usize
    }

    /// Records a successful steal between `thief` and `victim`.
    pub fn record_cooperation(&self, thief: usize, victim: usize) {
        if thief == victim || self.worker_count < 2 {
            return;
        }
        self.cooperation[self.index(thief, victim)].fetch_add(1, Ordering::Relaxed);
    }

    /// The observed cooperation count between `a` and `b`, order-independent.
    pub fn get_affinity(&self, a: usize, b: usize) -> u64 {
        if a == b || self.worker_count < 2 {
            return 0;
        }
        self.cooperation[self.index(a, b)].load(Ordering::Relaxed)
    }

    /// Every other worker, ranked by descending affinity with `worker_id`.
    pub fn get_preferred_victims(&self, worker_id: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, u64)> = (0..self.worker_count)
            .filter(|&w| w != worker_id)
            .map(|w| (w, self.get_affinity(worker_id, w)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(w, _)| w).collect()
    }
}

fn matrix_cells(worker_count: usize) -> usize {
    if worker_count < 2 {
        0
    } else {
        worker_count * (worker_count - 1) / 2
    }
}

/// Batch-steal sizing, matching `original_source`'s
/// `numa_work_stealer.h`: a thief asks for `clamp(victim_depth / 2,
/// min_batch, max_batch)` jobs in one go, unless `adaptive_batch_size` is
/// off, in which case it always asks for `max_batch`.
#[derive(Debug, Clone, Copy)]
pub struct BatchStealConfig {
    pub min_batch: usize,
    pub max_batch: usize,
    pub adaptive_batch_size: bool,
    /// Consecutive empty steal rounds tolerated before backoff kicks in.
    pub max_consecutive_failures: u32,
}

impl Default for BatchStealConfig {
    fn default() -> Self {
        BatchStealConfig {
            min_batch: 1,
            max_batch: 8,
            adaptive_batch_size: true,
            max_consecutive_failures: 4,
        }
    }
}

/// Running totals exposed for diagnostics.
#[derive(Debug, Default)]
pub struct WorkStealingStats {
    pub successful_steals: u64,
    pub failed_rounds: u64,
    pub batch_steals: u64,
    pub backoff_events: u64,
    pub total_backoff_ns: u64,
}

struct Counters {
    successful_steals: AtomicU64,
    failed_rounds: AtomicU64,
    batch_steals: AtomicU64,
    backoff_events: AtomicU64,
    total_backoff_ns: AtomicU64,
}

/// Coordinates stealing among a fixed set of worker deques. Each worker
/// registers its [`Stealer`] handle once at startup; thereafter any worker
/// can ask the coordinator to find it work via [`StealSource::try_steal_for`].
pub struct NumaWorkStealer {
    stealers: Mutex<Vec<Option<Stealer>>>,
    policy: VictimSelectionPolicy,
    backoff: BackoffCalculator,
    batch_config: BatchStealConfig,
    affinity: WorkAffinityTracker,
    round_robin_cursor: AtomicUsize,
    consecutive_failures: AtomicU64,
    counters: Counters,
}

impl NumaWorkStealer {
    /// Creates a coordinator sized for `worker_count` workers. Workers
    /// register their stealer handles via [`NumaWorkStealer::register`]
    /// before the pool starts running.
    pub fn new(worker_count: usize, policy: VictimSelectionPolicy, backoff: BackoffConfig) -> Self {
        Self::with_batch_config(worker_count, policy, backoff, BatchStealConfig::default())
    }

    /// As [`NumaWorkStealer::new`], with explicit batch-steal sizing.
    pub fn with_batch_config(
        worker_count: usize,
        policy: VictimSelectionPolicy,
        backoff: BackoffConfig,
        batch_config: BatchStealConfig,
    ) -> Self {
        let mut stealers = Vec::with_capacity(worker_count);
        stealers.resize_with(worker_count, || None);
        NumaWorkStealer {
            stealers: Mutex::new(stealers),
            policy,
            backoff: BackoffCalculator::new(backoff),
            batch_config,
            affinity: WorkAffinityTracker::new(worker_count),
            round_robin_cursor: AtomicUsize::new(0),
            consecutive_failures: AtomicU64::new(0),
            counters: Counters {
                successful_steals: AtomicU64::new(0),
                failed_rounds: AtomicU64::new(0),
                batch_steals: AtomicU64::new(0),
                backoff_events: AtomicU64::new(0),
                total_backoff_ns: AtomicU64::new(0),
            },
        }
    }

    /// Registers `stealer` as the handle for worker `id`. Must be called
    /// once per worker before it starts running.
    pub fn register(&self, id: usize, stealer: Stealer) {
        self.stealers.lock().unwrap()[id] = Some(stealer);
    }

    /// NUMA node for `worker_id`. Always `0`: see module docs.
    pub fn node_of(&self, _worker_id: usize) -> usize {
        0
    }

    fn victim_order(&self, worker_id: usize, worker_count: usize) -> Vec<usize> {
        match self.policy {
            VictimSelectionPolicy::Random => {
                let mut rng = SmallRng::from_entropy();
                let mut order: Vec<usize> =
                    (0..worker_count).filter(|&w| w != worker_id).collect();
                for i in (1..order.len()).rev() {
                    let j = rng.gen_range(0..=i);
                    order.swap(i, j);
                }
                order
            }
            VictimSelectionPolicy::RoundRobin => {
                let start = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % worker_count;
                (0..worker_count)
                    .map(|offset| (start + offset) % worker_count)
                    .filter(|&w| w != worker_id)
                    .collect()
            }
            VictimSelectionPolicy::Adaptive => {
                let stealers = self.stealers.lock().unwrap();
                let mut order: Vec<(usize, usize)> = (0..worker_count)
                    .filter(|&w| w != worker_id)
                    .map(|w| {
                        let len = stealers[w]
                            .as_ref()
                            .map(|s| s.approx_len())
                            .unwrap_or(0);
                        (w, len)
                    })
                    .collect();
                order.sort_by(|a, b| b.1.cmp(&a.1));
                order.into_iter().map(|(w, _)| w).collect()
            }
            VictimSelectionPolicy::NumaAware | VictimSelectionPolicy::Hierarchical => {
                let node = self.node_of(worker_id);
                let mut same_node: Vec<usize> = (0..worker_count)
                    .filter(|&w| w != worker_id && self.node_of(w) == node)
                    .collect();
                if self.policy == VictimSelectionPolicy::Hierarchical {
                    let preferred = self.affinity.get_preferred_victims(worker_id);
                    same_node.sort_by_key(|w| preferred.iter().position(|p| p == w).unwrap_or(usize::MAX));
                }
                let mut other_node: Vec<usize> = (0..worker_count)
                    .filter(|&w| w != worker_id && self.node_of(w) != node)
                    .collect();
                same_node.append(&mut other_node);
                same_node
            }
            VictimSelectionPolicy::LocalityAware => self.affinity.get_preferred_victims(worker_id),
        }
    }

    /// Attempts a batch steal from a single victim, sizing the batch as
    /// `clamp(victim_depth / 2, min_batch, max_batch)` (or a fixed
    /// `max_batch` when `adaptive_batch_size` is off), per spec §4.10. On
    /// a completely empty round, escalates through [`Self::note_failed_round`].
    pub fn try_steal_batch_for(&self, worker_id: usize) -> Vec<OwnedJob> {
        let worker_count = self.stealers.lock().unwrap().len();
        if worker_count < 2 {
            self.note_failed_round();
            return Vec::new();
        }
        let order = self.victim_order(worker_id, worker_count);
        for victim in order {
            let stealer = { self.stealers.lock().unwrap()[victim].clone() };
            let Some(stealer) = stealer else { continue };
            let depth = stealer.approx_len();
            if depth == 0 {
                continue;
            }
            let target = self.batch_size_for(depth);
            let mut batch = Vec::with_capacity(target);
            loop {
                if batch.len() >= target {
                    break;
                }
                match stealer.steal() {
                    Steal::Success(job) => batch.push(job),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
            if !batch.is_empty() {
                self.affinity.record_cooperation(worker_id, victim);
                self.counters
                    .successful_steals
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.counters.batch_steals.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                return batch;
            }
        }
        self.note_failed_round();
        Vec::new()
    }

    fn batch_size_for(&self, victim_depth: usize) -> usize {
        let BatchStealConfig {
            min_batch,
            max_batch,
            adaptive_batch_size,
            ..
        } = self.batch_config;
        if !adaptive_batch_size {
            return max_batch;
        }
        (victim_depth / 2).clamp(min_batch, max_batch)
    }

    /// Counts a fully-empty steal round; once consecutive empty rounds pass
    /// `max_consecutive_failures`, sleeps for the configured backoff delay
    /// and tallies the time spent (spec §4.10: "total backoff time is
    /// counted").
    fn note_failed_round(&self) {
        self.counters.failed_rounds.fetch_add(1, Ordering::Relaxed);
        let attempt = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if (attempt as u32) > self.batch_config.max_consecutive_failures {
            let over = attempt as u32 - self.batch_config.max_consecutive_failures;
            let mut rng = SmallRng::from_entropy();
            let delay = self.backoff.calculate(over, &mut rng);
            std::thread::sleep(delay);
            self.counters.backoff_events.fetch_add(1, Ordering::Relaxed);
            self.counters
                .total_backoff_ns
                .fetch_add(delay.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    /// Snapshot of stealing counters.
    pub fn stats(&self) -> WorkStealingStats {
        WorkStealingStats {
            successful_steals: self.counters.successful_steals.load(Ordering::Relaxed),
            failed_rounds: self.counters.failed_rounds.load(Ordering::Relaxed),
            batch_steals: self.counters.batch_steals.load(Ordering::Relaxed),
            backoff_events: self.counters.backoff_events.load(Ordering::Relaxed),
            total_backoff_ns: self.counters.total_backoff_ns.load(Ordering::Relaxed),
        }
    }

    /// The configured backoff delay for `attempt` failed rounds; exposed
    /// for callers that want to preview a delay without going through
    /// [`Self::try_steal_batch_for`]'s internal escalation.
    pub fn backoff_for(&self, attempt: u32, rng: &mut SmallRng) -> Duration {
        self.backoff.calculate(attempt, rng)
    }
}

impl StealSource for NumaWorkStealer {
    fn try_steal_for(&self, worker_id: usize) -> Option<OwnedJob> {
        let worker_count = self.stealers.lock().unwrap().len();
        if worker_count < 2 {
            return None;
        }
        let order = self.victim_order(worker_id, worker_count);
        for victim in order {
            let stealer = { self.stealers.lock().unwrap()[victim].clone() };
            let Some(stealer) = stealer else { continue };
            loop {
                match stealer.steal() {
                    Steal::Success(job) => {
                        self.affinity.record_cooperation(worker_id, victim);
                        self.counters.successful_steals.fetch_add(1, Ordering::Relaxed);
                        return Some(job);
                    }
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    fn try_steal_batch_for(&self, worker_id: usize) -> Vec<OwnedJob> {
        NumaWorkStealer::try_steal_batch_for(self, worker_id)
    }
}
