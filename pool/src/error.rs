//! Error types for the thread pool

use thiserror::Error;

/// Lifecycle errors reported synchronously by pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was configured with zero workers
    #[error("worker count must be greater than zero")]
    ZeroWorkers,

    /// A task was submitted after the pool stopped accepting work
    #[error("thread pool is stopped")]
    Stopped,

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result alias for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Failures surfaced through a [`TaskHandle`](crate::TaskHandle) on retrieval
#[derive(Debug, Error)]
pub enum TaskError {
    /// The submitted callable panicked while executing
    #[error("task panicked: {message}")]
    Panicked {
        /// The panic payload rendered as text
        message: String,
    },

    /// The task was discarded before it could run, so no result will ever
    /// arrive
    #[error("task was discarded before it could run")]
    Abandoned,
}
