//! # Shadow Jobs
//!
//! A priority-aware, multi-threaded job scheduler for the Shadow engine.
//!
//! Work is submitted to a [`Scheduler`] under an [`ExecutionContext`]: a small
//! completion token that counts unfinished task groups. Callers poll it with
//! [`ExecutionContext::is_working`] or block on it with
//! [`Scheduler::wait_for`].
//!
//! ## Priority Classes
//!
//! Every [`Priority`] owns a fixed set of OS threads created at init:
//!
//! - **Highest**: all hardware threads but one. The default class.
//! - **Low**: all hardware threads but two, for background work.
//! - **Stream**: a single thread for resource streaming.
//!
//! Classes never share threads, so a saturated `Low` class cannot delay
//! `Highest` work. There is no preemption: a running task keeps its thread
//! until it returns.
//!
//! ## Submitting Work
//!
//! - [`Scheduler::run`] runs one closure.
//! - [`Scheduler::dispatch`] fans a closure out over `jobs` indices, split into
//!   groups of `group_size`; each group runs on one thread.
//! - [`Scheduler::dispatch_with_shared`] also hands every group a scratch
//!   buffer borrowed from the executing worker.
//!
//! Groups are spread round-robin over the per-worker queues of the class. A
//! class with a single thread runs submissions inline on the caller.
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use shadow_jobs::{ExecutionContext, Priority, Scheduler, SchedulerConfig, TaskArguments};
//!
//! let scheduler = Scheduler::start(SchedulerConfig::new()).unwrap();
//!
//! let ctx = ExecutionContext::new(Priority::Highest);
//! let visited = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&visited);
//! scheduler
//!     .dispatch(&ctx, 1000, 64, move |_args: TaskArguments<'_>| {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//!
//! scheduler.wait_for(&ctx).unwrap();
//! assert_eq!(visited.load(Ordering::Relaxed), 1000);
//!
//! scheduler.destroy();
//! ```
//!
//! ## Shutdown
//!
//! [`Scheduler::destroy`] stops and joins every worker. Queued groups are run
//! or dropped according to [`ShutdownPolicy`]; either way every context ends
//! up idle.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and the scheduler itself.
pub mod core;
/// Configuration models for the scheduler.
pub mod config;
/// Shared utilities.
pub mod util;

pub use crate::config::{SchedulerConfig, ShutdownPolicy};
pub use crate::core::{
    dispatch_groups, ClassStats, ExecutionContext, JobsError, Priority, Scheduler, TaskArguments,
};
