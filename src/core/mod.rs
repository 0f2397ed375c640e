//! Core scheduling abstractions: contexts, task groups, queues and the
//! scheduler that owns the worker threads.

pub mod context;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod task;
mod worker;

pub use context::{ExecutionContext, Priority};
pub use error::{AppResult, JobsError};
pub use queue::{ClassStats, PriorityQueue, TaskQueue};
pub use scheduler::Scheduler;
pub use task::{dispatch_groups, ScratchArena, TaskArguments, TaskFn, TaskGroup};
