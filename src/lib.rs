//! A reusable concurrent job-execution substrate: prioritized, aging,
//! work-stealing thread pools over a choice of interchangeable queue
//! backends.
//!
//! The pieces compose in layers:
//!
//! - [`job`] / [`cancel`] -- what gets run, and how it's told to stop early.
//! - [`priority`] / [`capabilities`] -- the scheduling vocabulary and the
//!   per-queue-kind guarantees a caller can rely on.
//! - [`sync`] -- queue backends: a mutex-guarded FIFO, a lock-free MPMC
//!   queue, a Chase-Lev work-stealing deque, and the typed/aging/adaptive
//!   queues layered on top.
//! - [`worker`] / [`stealer`] -- the per-thread execution loop and the
//!   work-stealing coordinator that connects workers to each other.
//! - [`pool`] -- ties a queue backend, a worker group, and the coordinator
//!   together into a single lifecycle.
//! - [`diagnostics`] / [`sink`] -- the introspection surface and the
//!   external logging/metrics seams a host application wires in.
//! - [`error`] -- the error taxonomy every fallible operation returns.
//!
//! Most callers only need [`pool::Pool`], [`pool::PoolBuilder`], and
//! [`job::Job`] (or the [`job::FnJob`] closure adapter); the rest of the
//! public surface exists for callers who want to swap a queue backend,
//! plug in their own work-stealing policy, or read diagnostics directly.

pub mod cancel;
pub mod capabilities;
pub mod diagnostics;
pub mod error;
pub mod job;
pub mod pool;
pub mod priority;
pub mod sink;
pub mod stealer;
pub mod sync;
pub mod worker;

pub use cancel::CancellationToken;
pub use capabilities::QueueCapabilities;
pub use error::{Error, Result};
pub use job::{FnJob, Job, OwnedJob};
pub use pool::{Pool, PoolBuilder, PoolConfig};
pub use priority::{AgedPriority, AgingCurve, Priority};
pub use sink::{LogLevel, LogSink, MetricValue, MetricsSink, NullLogSink, NullMetricsSink};
pub use sync::Injector;
