//! Tests for error types

use shadow_jobs::core::{JobsError, Priority};

#[test]
fn test_already_initialized_error() {
    let err = JobsError::AlreadyInitialized;
    assert_eq!(format!("{}", err), "scheduler already initialized");
}

#[test]
fn test_not_running_error() {
    let err = JobsError::NotRunning;
    assert_eq!(format!("{}", err), "scheduler is not running");
}

#[test]
fn test_thread_spawn_error() {
    let err = JobsError::ThreadSpawn {
        class: Priority::Stream,
        worker: 0,
        source: std::io::Error::other("out of threads"),
    };
    assert_eq!(
        format!("{}", err),
        "failed to spawn stream worker 0: out of threads"
    );
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_invalid_config_error() {
    let err = JobsError::InvalidConfig("max_threads_per_class must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_threads_per_class must be greater than 0"
    );
}
