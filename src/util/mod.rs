//! Shared utilities.

pub mod telemetry;
pub mod thread_tuning;

pub use telemetry::*;
pub use thread_tuning::{NoopThreadTuning, OsThreadTuning, ThreadTuning};
