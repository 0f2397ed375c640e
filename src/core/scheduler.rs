//! The job scheduler: priority classes of dedicated OS threads fed through
//! round-robin per-worker queues.
//!
//! # Lifecycle
//!
//! A [`Scheduler`] is created from a [`SchedulerConfig`] and does nothing until
//! [`Scheduler::init`] spawns its workers. [`Scheduler::destroy`] (or dropping
//! the scheduler) stops and joins every worker; the scheduler can be
//! initialized again afterwards.
//!
//! # Waiting
//!
//! [`Scheduler::wait_for`] never sleeps on a worker. The calling thread helps
//! drain the context's class once and then yields in a loop, burning CPU until
//! the context is idle. Configure [`SchedulerConfig::wait_spin_limit`] to park
//! after a bounded number of yields instead.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use shadow_jobs::{ExecutionContext, Scheduler, SchedulerConfig, TaskArguments};
//!
//! let scheduler = Scheduler::start(SchedulerConfig::new().with_max_threads(4)).unwrap();
//! let ctx = ExecutionContext::default();
//! let sum = Arc::new(AtomicUsize::new(0));
//!
//! let out = Arc::clone(&sum);
//! scheduler
//!     .dispatch(&ctx, 100, 16, move |args: TaskArguments<'_>| {
//!         out.fetch_add(args.index, Ordering::Relaxed);
//!     })
//!     .unwrap();
//! scheduler.wait_for(&ctx).unwrap();
//!
//! assert_eq!(sum.load(Ordering::Relaxed), 4950);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::util::{OsThreadTuning, ThreadTuning};

use super::worker::{current_worker, spawn_worker, Shared, WorkerExit, WorkerHandle};
use super::{
    dispatch_groups, ClassStats, ExecutionContext, JobsError, Priority, ScratchArena,
    TaskArguments, TaskFn, TaskGroup,
};

/// Interval between shutdown wake-ups while workers are still leaving.
const SHUTDOWN_WAKE_INTERVAL: Duration = Duration::from_millis(1);

/// Longest single park of a waiter; bounds the cost of a missed wake-up.
const PARK_SLICE: Duration = Duration::from_millis(10);

/// How many idle workers a submission wakes.
#[derive(Debug, Clone, Copy)]
enum Wake {
    One,
    All,
}

/// Live worker threads of an initialized scheduler.
struct Runtime {
    shared: Arc<Shared>,
    workers: Vec<WorkerHandle>,
    exits: Receiver<WorkerExit>,
}

impl Runtime {
    /// Stop every worker, join it, then settle whatever is still queued
    /// according to the shutdown policy.
    ///
    /// When called from one of its own workers (a task dropped the last
    /// scheduler handle), that worker cannot report or join itself: it is
    /// detached and leaves its loop once the calling task returns.
    fn shutdown(self) {
        let Self {
            shared,
            mut workers,
            exits,
        } = self;
        shared.alive.store(false, Ordering::Release);

        if let Some((class, worker)) = current_worker(shared.id) {
            warn!(
                scheduler = %shared.id,
                class = %class,
                worker,
                "Scheduler destroyed from its own worker; detaching that worker"
            );
            workers.retain(|w| (w.class, w.worker) != (class, worker));
        }

        // A single notify can land before a worker starts waiting, so keep
        // signalling until each worker has reported its exit.
        let mut exited = 0;
        while exited < workers.len() {
            for class in &shared.classes {
                class.notify_all();
            }
            match exits.recv_timeout(SHUTDOWN_WAKE_INTERVAL) {
                Ok(exit) => {
                    exited += 1;
                    debug!(class = %exit.class, worker = exit.worker, "Worker stopped");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for worker in workers {
            if worker.handle.join().is_err() {
                warn!(class = %worker.class, worker = worker.worker, "Worker panicked");
            }
        }

        let mut arena = ScratchArena::new();
        for class in &shared.classes {
            match shared.policy {
                ShutdownPolicy::Drain => {
                    let ran = class.execute_from(0, &mut arena);
                    if ran > 0 {
                        debug!(
                            class = %class.priority(),
                            ran,
                            "Drained leftover groups on shutdown"
                        );
                    }
                }
                ShutdownPolicy::Discard => {
                    let dropped = class.discard_all();
                    if dropped > 0 {
                        warn!(
                            class = %class.priority(),
                            dropped,
                            "Discarded queued groups on shutdown"
                        );
                    }
                }
            }
        }

        info!(scheduler = %shared.id, "Scheduler shut down");
    }
}

/// Priority-aware job scheduler.
///
/// Owns one [`PriorityQueue`](super::PriorityQueue) per [`Priority`], each
/// with its own worker threads. Share it by reference (or inside an `Arc`) with
/// every subsystem that submits work.
///
/// Tasks must not call [`Scheduler::destroy`] on the scheduler running them:
/// destroy joins the calling worker.
pub struct Scheduler {
    config: SchedulerConfig,
    tuning: Arc<dyn ThreadTuning>,
    runtime: RwLock<Option<Runtime>>,
    /// Destroys detached from `runtime` but not yet settled.
    shutting_down: AtomicUsize,
}

impl Scheduler {
    /// Create a scheduler without starting any threads.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self, JobsError> {
        config.validate().map_err(JobsError::InvalidConfig)?;
        let tuning: Arc<dyn ThreadTuning> =
            Arc::new(OsThreadTuning::new(config.cores(), config.pin_threads));
        Ok(Self {
            config,
            tuning,
            runtime: RwLock::new(None),
            shutting_down: AtomicUsize::new(0),
        })
    }

    /// Create a scheduler and spawn its workers.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::InvalidConfig` for an invalid configuration and
    /// `JobsError::ThreadSpawn` if a worker thread cannot be created.
    pub fn start(config: SchedulerConfig) -> Result<Self, JobsError> {
        let scheduler = Self::new(config)?;
        scheduler.init()?;
        Ok(scheduler)
    }

    /// Replace the platform hooks applied to workers spawned from now on.
    #[must_use]
    pub fn with_tuning(mut self, tuning: impl ThreadTuning) -> Self {
        self.tuning = Arc::new(tuning);
        self
    }

    /// Configuration this scheduler was built from.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Thread count of each class for the configured machine size:
    /// `Highest` gets all cores but one, `Low` all but two, `Stream` one, each
    /// clamped to `1..=max_threads_per_class`.
    #[must_use]
    pub fn class_threads(&self) -> [usize; Priority::COUNT] {
        let cores = self.config.cores();
        let max = self.config.max_threads_per_class;
        Priority::ALL.map(|p| p.natural_threads(cores).clamp(1, max))
    }

    /// Spawn the worker threads of every class.
    ///
    /// # Errors
    ///
    /// - `JobsError::AlreadyInitialized` if workers are already running; the
    ///   running scheduler is left untouched.
    /// - `JobsError::ThreadSpawn` if the OS refuses a thread; workers spawned
    ///   before the failure are stopped again.
    pub fn init(&self) -> Result<(), JobsError> {
        let mut slot = self.runtime.write();
        if slot.is_some() {
            return Err(JobsError::AlreadyInitialized);
        }

        let started = Instant::now();
        let counts = self.class_threads();
        let shared = Arc::new(Shared::new(counts, self.config.shutdown));
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(counts.iter().sum());

        for class in Priority::ALL {
            for worker in 0..counts[class.index()] {
                let spawned = spawn_worker(
                    &shared,
                    class,
                    worker,
                    &self.config,
                    &self.tuning,
                    exit_tx.clone(),
                );
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(source) => {
                        drop(exit_tx);
                        Runtime {
                            shared,
                            workers,
                            exits: exit_rx,
                        }
                        .shutdown();
                        return Err(JobsError::ThreadSpawn {
                            class,
                            worker,
                            source,
                        });
                    }
                }
            }
        }
        drop(exit_tx);

        info!(
            scheduler = %shared.id,
            cores = self.config.cores(),
            highest = counts[Priority::Highest.index()],
            low = counts[Priority::Low.index()],
            stream = counts[Priority::Stream.index()],
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Scheduler initialized"
        );

        *slot = Some(Runtime {
            shared,
            workers,
            exits: exit_rx,
        });
        Ok(())
    }

    /// Stop and join every worker. Calling it on a scheduler that is not
    /// running does nothing.
    pub fn destroy(&self) {
        self.shutting_down.fetch_add(1, Ordering::SeqCst);
        let runtime = self.runtime.write().take();
        if let Some(runtime) = runtime {
            runtime.shutdown();
        }
        self.shutting_down.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether workers are currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.read_recursive().is_some()
    }

    /// Identifier of the running instance, used in log fields.
    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.runtime.read_recursive().as_ref().map(|rt| rt.shared.id)
    }

    /// Worker threads owned by class `priority`; 0 when not running.
    #[must_use]
    pub fn threads_of_priority(&self, priority: Priority) -> usize {
        self.runtime
            .read_recursive()
            .as_ref()
            .map_or(0, |rt| rt.shared.class(priority).threads())
    }

    /// Counters of class `priority`, or `None` when not running.
    #[must_use]
    pub fn stats(&self, priority: Priority) -> Option<ClassStats> {
        self.runtime
            .read_recursive()
            .as_ref()
            .map(|rt| rt.shared.class(priority).stats())
    }

    /// Run `task` once, off the calling thread when its class has more than
    /// one worker. On a single-threaded class the task runs inline and has
    /// finished when this returns.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::NotRunning` if the scheduler is not initialized.
    pub fn run<F>(&self, context: &ExecutionContext, task: F) -> Result<(), JobsError>
    where
        F: Fn(TaskArguments<'_>) + Send + Sync + 'static,
    {
        self.submit(context, 1, 1, 0, Arc::new(task), Wake::One)
    }

    /// Split `jobs` indices into groups of `group_size` and run `task` once per
    /// index. Zero jobs or a zero group size is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::NotRunning` if the scheduler is not initialized.
    pub fn dispatch<F>(
        &self,
        context: &ExecutionContext,
        jobs: usize,
        group_size: usize,
        task: F,
    ) -> Result<(), JobsError>
    where
        F: Fn(TaskArguments<'_>) + Send + Sync + 'static,
    {
        self.submit(context, jobs, group_size, 0, Arc::new(task), Wake::All)
    }

    /// Like [`Scheduler::dispatch`], giving every group `shared_bytes` of
    /// scratch memory through [`TaskArguments::shared`].
    ///
    /// # Errors
    ///
    /// Returns `JobsError::NotRunning` if the scheduler is not initialized.
    pub fn dispatch_with_shared<F>(
        &self,
        context: &ExecutionContext,
        jobs: usize,
        group_size: usize,
        shared_bytes: usize,
        task: F,
    ) -> Result<(), JobsError>
    where
        F: Fn(TaskArguments<'_>) + Send + Sync + 'static,
    {
        self.submit(context, jobs, group_size, shared_bytes, Arc::new(task), Wake::All)
    }

    fn submit(
        &self,
        context: &ExecutionContext,
        jobs: usize,
        group_size: usize,
        shared_bytes: usize,
        work: TaskFn,
        wake: Wake,
    ) -> Result<(), JobsError> {
        if jobs == 0 || group_size == 0 {
            return Ok(());
        }
        // Held across the push so destroy cannot detach the runtime between
        // the liveness check and the enqueue.
        let guard = self.runtime.read_recursive();
        let runtime = guard.as_ref().ok_or(JobsError::NotRunning)?;
        let queue = runtime.shared.class(context.priority());

        let count = dispatch_groups(jobs, group_size);
        // Count every group before any of them can run.
        context.add_pending(count);
        let groups: Vec<TaskGroup> = (0..count)
            .map(|group| {
                let start = group * group_size;
                let end = start.saturating_add(group_size).min(jobs);
                TaskGroup::new(
                    Arc::clone(&work),
                    context.clone(),
                    group,
                    start,
                    end,
                    shared_bytes,
                )
            })
            .collect();
        // The groups own the closure from here on; once the last one is
        // released, so are the closure's captures.
        drop(work);

        if queue.threads() <= 1 {
            let shared = Arc::clone(&runtime.shared);
            drop(guard);
            shared
                .class(context.priority())
                .execute_inline(groups, &mut ScratchArena::new());
            return Ok(());
        }

        debug!(
            scheduler = %runtime.shared.id,
            class = %context.priority(),
            jobs,
            groups = count,
            "Submitting task groups"
        );
        match wake {
            Wake::One => {
                for group in groups {
                    queue.push_round_robin(group);
                }
                queue.notify_one();
            }
            Wake::All => {
                queue.distribute(groups);
                queue.notify_all();
            }
        }
        Ok(())
    }

    /// Whether `context` still has unfinished groups.
    #[must_use]
    pub fn is_working(&self, context: &ExecutionContext) -> bool {
        context.is_working()
    }

    /// Block until `context` is idle.
    ///
    /// The calling thread wakes the context's class, helps by draining the
    /// class queues once, then yields until the pending count reaches zero.
    /// There is no timeout.
    ///
    /// A destroy running concurrently settles every group it detached, so
    /// the wait simply continues until that happens.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::NotRunning` if the context still has pending work
    /// while the scheduler is neither running nor shutting down.
    pub fn wait_for(&self, context: &ExecutionContext) -> Result<(), JobsError> {
        if !context.is_working() {
            return Ok(());
        }
        let shared = self
            .runtime
            .read_recursive()
            .as_ref()
            .map(|rt| Arc::clone(&rt.shared));

        match shared {
            Some(shared) => {
                let queue = shared.class(context.priority());
                queue.notify_all();
                let mut arena = ScratchArena::new();
                queue.execute_from(queue.next_index(), &mut arena);
            }
            None => {
                // Read the counter after the runtime: a destroy that already
                // finished has settled all of its groups.
                if self.shutting_down.load(Ordering::SeqCst) == 0 && context.is_working() {
                    return Err(JobsError::NotRunning);
                }
            }
        }
        self.wait_idle(context);
        Ok(())
    }

    fn wait_idle(&self, context: &ExecutionContext) {
        match self.config.wait_spin_limit {
            None => {
                while context.is_working() {
                    thread::yield_now();
                }
            }
            Some(limit) => {
                let mut spins = 0;
                while context.is_working() && spins < limit {
                    thread::yield_now();
                    spins += 1;
                }
                context.park_until_idle(PARK_SLICE);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("id", &self.id())
            .field("threads", &Priority::ALL.map(|p| self.threads_of_priority(p)))
            .finish_non_exhaustive()
    }
}
