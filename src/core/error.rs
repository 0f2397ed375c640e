//! Error types for scheduler operations.

use thiserror::Error;

use super::Priority;

/// Errors produced by the job scheduler.
#[derive(Debug, Error)]
pub enum JobsError {
    /// `init` was called on a scheduler whose workers are already running.
    #[error("scheduler already initialized")]
    AlreadyInitialized,
    /// Work was submitted or awaited while no worker threads exist.
    #[error("scheduler is not running")]
    NotRunning,
    /// The OS refused to create a worker thread.
    #[error("failed to spawn {class} worker {worker}: {source}")]
    ThreadSpawn {
        /// Priority class the worker belonged to.
        class: Priority,
        /// Index of the worker within its class.
        worker: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
