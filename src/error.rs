//! Stable error taxonomy shared by every queue, worker and pool operation.

/// Errors produced by the job-execution substrate.
///
/// Names are part of the public contract: callers match on variants, not on
/// formatted messages. See spec §6/§7 for the three error bands (fatal to
/// the calling operation, recoverable mid-loop, and internal-invariant).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller passed a null/invalid job or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The pool has not been started yet.
    #[error("pool has not been started")]
    NotStarted,

    /// `start()` was called on a pool that is already running.
    #[error("pool is already started")]
    AlreadyStarted,

    /// The queue has been signalled to stop and rejects new work.
    #[error("queue has been stopped")]
    QueueStopped,

    /// A blocking dequeue found nothing and the queue is stopped.
    #[error("queue is empty")]
    QueueEmpty,

    /// A bounded queue is at capacity.
    #[error("queue is full")]
    QueueFull,

    /// A required resource (thread, slot, handle) could not be obtained.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The job itself is malformed (e.g. empty name where one is required).
    #[error("job is invalid: {0}")]
    JobInvalid(String),

    /// `Job::run()` returned or panicked with an application-level failure.
    #[error("job execution failed: {cause}")]
    JobExecutionFailed {
        /// Human-readable cause, captured from the error or panic payload.
        cause: String,
    },

    /// The job observed cancellation and stopped early.
    #[error("job was cancelled")]
    Cancelled,

    /// The operation is a documented stub (reserved for future policies).
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
