//! C9: a queue that boosts waiting jobs' effective priority over time, so a
//! steady stream of `RealTime` work can't starve `Background` work forever
//! (spec §4.7; curve and defaults carried from `original_source`'s
//! `priority_aging_config.h`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::job::OwnedJob;
use crate::priority::{AgedPriority, AgingCurve, Priority};

/// Tuning knobs for the background aging tick.
#[derive(Debug, Clone)]
pub struct AgingQueueConfig {
    /// How often the ager thread re-evaluates every waiting job's boost.
    pub tick_interval: Duration,
    /// Per-tick boost added under [`AgingCurve::Linear`], and the floor for
    /// [`AgingCurve::Exponential`]'s multiplicative step.
    pub boost_amount: i32,
    /// Upper bound on accumulated boost; a job can rise at most this many
    /// priority levels above its base.
    pub max_boost: i32,
    /// The growth curve applied to waiting jobs.
    pub curve: AgingCurve,
    /// Multiplicative step for [`AgingCurve::Exponential`].
    pub exponential_factor: f64,
    /// Wait time past which a still-unserved job fires the starvation
    /// callback (at most once per job, per wait period).
    pub starvation_threshold: Duration,
    /// Whether a successful dequeue resets every *other* waiting job's
    /// boost back to zero. Chosen interpretation for the open question of
    /// "what does reset-on-dequeue mean" (see DESIGN.md): once the
    /// most-starved job has been served, restart the aging clock for
    /// everyone rather than let boosts keep compounding across service
    /// events.
    pub reset_on_dequeue: bool,
}

impl Default for AgingQueueConfig {
    fn default() -> Self {
        AgingQueueConfig {
            tick_interval: Duration::from_millis(50),
            boost_amount: 1,
            max_boost: 2,
            curve: AgingCurve::Linear,
            exponential_factor: 1.5,
            starvation_threshold: Duration::from_secs(5),
            reset_on_dequeue: false,
        }
    }
}

/// Details passed to a starvation callback.
pub struct StarvationEvent {
    pub job_name: String,
    pub base_priority: Priority,
    pub waited: Duration,
}

type StarvationCallback = Box<dyn Fn(&StarvationEvent) + Send + Sync>;

struct Entry {
    aged: AgedPriority,
    job: OwnedJob,
    starvation_fired: bool,
}

struct State {
    entries: Vec<Entry>,
    stopped: bool,
}

/// Running totals exposed for diagnostics.
#[derive(Debug, Default)]
pub struct AgingStats {
    pub ticks: u64,
    pub boosts_applied: u64,
    pub starvation_events: u64,
}

struct Counters {
    ticks: AtomicU64,
    boosts_applied: AtomicU64,
    starvation_events: AtomicU64,
}

/// A [`crate::sync::typed_queue::TypedQueue`]-like priority queue that ages
/// entries in the background so low-priority jobs eventually get served.
pub struct AgingQueue {
    state: Arc<Mutex<State>>,
    not_empty: Arc<Condvar>,
    config: AgingQueueConfig,
    counters: Arc<Counters>,
    ager_stop: Arc<AtomicBool>,
    ager_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AgingQueue {
    /// Starts a new aging queue, spawning its background ager thread
    /// immediately. The thread is joined when the queue is dropped.
    pub fn new(config: AgingQueueConfig) -> Arc<Self> {
        Self::with_starvation_callback(config, None)
    }

    /// As [`AgingQueue::new`], additionally invoking `on_starvation` the
    /// first time any job crosses `config.starvation_threshold` while still
    /// waiting.
    pub fn with_starvation_callback(
        config: AgingQueueConfig,
        on_starvation: Option<StarvationCallback>,
    ) -> Arc<Self> {
        let queue = Arc::new(AgingQueue {
            state: Arc::new(Mutex::new(State {
                entries: Vec::new(),
                stopped: false,
            })),
            not_empty: Arc::new(Condvar::new()),
            config,
            counters: Arc::new(Counters {
                ticks: AtomicU64::new(0),
                boosts_applied: AtomicU64::new(0),
                starvation_events: AtomicU64::new(0),
            }),
            ager_stop: Arc::new(AtomicBool::new(false)),
            ager_handle: Mutex::new(None),
        });
        queue.spawn_ager(on_starvation);
        queue
    }

    fn spawn_ager(self: &Arc<Self>, on_starvation: Option<StarvationCallback>) {
        let state = self.state.clone();
        let counters = self.counters.clone();
        let stop = self.ager_stop.clone();
        let tick_interval = self.config.tick_interval;
        let boost_amount = self.config.boost_amount;
        let max_boost = self.config.max_boost;
        let curve = self.config.curve;
        let exponential_factor = self.config.exponential_factor;
        let starvation_threshold = self.config.starvation_threshold;

        let handle = thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                thread::sleep(tick_interval);
                let mut guard = state.lock().unwrap();
                if guard.stopped {
                    break;
                }
                for entry in guard.entries.iter_mut() {
                    let wait = entry.aged.wait_time();
                    let increment = boost_increment(
                        curve,
                        entry.aged.boost(),
                        wait,
                        boost_amount,
                        exponential_factor,
                    );
                    if increment > 0 {
                        entry.aged.apply_boost(increment, max_boost);
                        counters.boosts_applied.fetch_add(1, Ordering::Relaxed);
                    }
                    if !entry.starvation_fired && wait >= starvation_threshold {
                        entry.starvation_fired = true;
                        counters.starvation_events.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            "job '{}' waited {:?}, past the {:?} starvation threshold",
                            entry.job.name(),
                            wait,
                            starvation_threshold
                        );
                        if let Some(cb) = on_starvation.as_ref() {
                            cb(&StarvationEvent {
                                job_name: entry.job.name().to_string(),
                                base_priority: entry.aged.base_priority(),
                                waited: wait,
                            });
                        }
                    }
                }
                counters.ticks.fetch_add(1, Ordering::Relaxed);
            }
        });
        *self.ager_handle.lock().unwrap() = Some(handle);
    }

    /// Enqueues `job` at `base` priority with a freshly reset aging clock.
    pub fn enqueue(&self, base: Priority, job: OwnedJob) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::QueueStopped);
        }
        state.entries.push(Entry {
            aged: AgedPriority::new(base),
            job,
            starvation_fired: false,
        });
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the job with the numerically-lowest (most urgent) effective
    /// priority, breaking ties by earliest enqueue time. Does not block.
    pub fn try_dequeue(&self) -> Result<OwnedJob, Error> {
        let mut state = self.state.lock().unwrap();
        let winner_index = state
            .entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.aged
                    .effective_priority()
                    .cmp(&b.aged.effective_priority())
                    .then(a.aged.enqueued_at().cmp(&b.aged.enqueued_at()))
            })
            .map(|(i, _)| i);

        let Some(index) = winner_index else {
            return Err(Error::QueueEmpty);
        };
        let winner = state.entries.remove(index);

        if self.config.reset_on_dequeue {
            for entry in state.entries.iter_mut() {
                entry.aged.reset_boost();
            }
        }
        Ok(winner.job)
    }

    /// Blocks until a job is ready or the queue is stopped.
    pub fn dequeue(&self) -> Result<OwnedJob, Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(index) = state
                .entries
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.aged
                        .effective_priority()
                        .cmp(&b.aged.effective_priority())
                        .then(a.aged.enqueued_at().cmp(&b.aged.enqueued_at()))
                })
                .map(|(i, _)| i)
            {
                let winner = state.entries.remove(index);
                if self.config.reset_on_dequeue {
                    for entry in state.entries.iter_mut() {
                        entry.aged.reset_boost();
                    }
                }
                return Ok(winner.job);
            }
            if state.stopped {
                return Err(Error::QueueEmpty);
            }
            let (guard, timeout) = self
                .not_empty
                .wait_timeout(state, self.config.tick_interval)
                .unwrap();
            state = guard;
            let _ = timeout;
        }
    }

    /// Stops the queue: wakes blocked consumers and rejects further
    /// enqueues. Also stops (but does not join) the background ager.
    pub fn stop_waiting(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.ager_stop.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    /// Exact current length.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Snapshot of ager-thread counters.
    pub fn stats(&self) -> AgingStats {
        AgingStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            boosts_applied: self.counters.boosts_applied.load(Ordering::Relaxed),
            starvation_events: self.counters.starvation_events.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AgingQueue {
    fn drop(&mut self) {
        self.ager_stop.store(true, Ordering::Release);
        if let Some(handle) = self.ager_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn boost_increment(
    curve: AgingCurve,
    current_boost: i32,
    wait: Duration,
    boost_amount: i32,
    exponential_factor: f64,
) -> i32 {
    match curve {
        AgingCurve::Linear => boost_amount,
        AgingCurve::Exponential => {
            let base = current_boost.max(1) as f64;
            let next = (base * exponential_factor).ceil() as i32;
            (next - current_boost).max(boost_amount)
        }
        AgingCurve::Logarithmic => {
            let wait_ms = (wait.as_millis().max(1)) as f64;
            let target = wait_ms.log2().floor() as i32;
            (target - current_boost).max(0)
        }
    }
}
