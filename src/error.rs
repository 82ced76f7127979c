//! Error type shared by executors, task handles, and offloaded calls.

/// A specialized `Result` type for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The ways a bridged task or executor operation can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The executor has begun shutting down and no longer accepts work.
    #[error("executor is closed")]
    Closed,

    /// The API was used from the wrong place, e.g. blocking on a task from
    /// inside its own executor, or awaiting an offload outside a task.
    #[error("executor misuse: {0}")]
    Misuse(&'static str),

    /// A timed wait elapsed before the task finished. The task itself is
    /// unaffected and keeps running.
    #[error("task result timed out")]
    Timeout,

    /// The task (or an offloaded blocking call) panicked. Carries the panic
    /// message.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The task was cancelled before it could finish.
    #[error("task cancelled")]
    Cancelled,

    /// A module-level shortcut was used before the process-global executor
    /// was set up.
    #[error("global executor not initialized")]
    NotInitialized,
}
