//! Per-worker FIFO queues and the per-class queue set.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{Priority, ScratchArena, TaskGroup};

/// FIFO list of groups assigned to one worker.
#[derive(Debug, Default)]
pub struct TaskQueue {
    groups: Mutex<VecDeque<TaskGroup>>,
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group to the back of the queue.
    pub fn push(&self, group: TaskGroup) {
        self.groups.lock().push_back(group);
    }

    /// Append several groups under a single lock.
    pub fn extend(&self, groups: impl IntoIterator<Item = TaskGroup>) {
        self.groups.lock().extend(groups);
    }

    /// Take the oldest group, if any.
    pub fn pop(&self) -> Option<TaskGroup> {
        self.groups.lock().pop_front()
    }

    /// Number of queued groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Whether the queue holds no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    /// Remove every queued group, returning them in FIFO order.
    pub fn take_all(&self) -> VecDeque<TaskGroup> {
        std::mem::take(&mut *self.groups.lock())
    }
}

/// Utilization counters for one priority class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStats {
    /// Class these numbers describe.
    pub priority: Priority,
    /// Worker threads owned by the class.
    pub worker_count: usize,
    /// Groups sitting in the class queues right now.
    pub queued_groups: usize,
    /// Groups accepted since the scheduler started.
    pub submitted_groups: u64,
    /// Groups that ran to completion.
    pub completed_groups: u64,
    /// Groups whose task panicked on a worker.
    pub panicked_groups: u64,
    /// Groups dropped unexecuted during shutdown.
    pub discarded_groups: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ClassCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
    pub discarded: AtomicU64,
}

/// Resources of one priority class: one queue per worker, a round-robin
/// submission cursor and the condition its idle workers sleep on.
#[derive(Debug)]
pub struct PriorityQueue {
    priority: Priority,
    queues: Box<[TaskQueue]>,
    next_queue: AtomicUsize,
    wake_lock: Mutex<()>,
    wake: Condvar,
    pub(crate) counters: ClassCounters,
}

impl PriorityQueue {
    /// Create the queue set for `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero; every class owns at least one worker.
    #[must_use]
    pub fn new(priority: Priority, threads: usize) -> Self {
        assert!(threads > 0, "priority class {priority} needs at least one worker");
        Self {
            priority,
            queues: (0..threads).map(|_| TaskQueue::new()).collect(),
            next_queue: AtomicUsize::new(0),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            counters: ClassCounters::default(),
        }
    }

    /// Class served by this queue set.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Number of workers, which equals the number of queues.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.queues.len()
    }

    /// Advance the round-robin cursor and return the selected queue index.
    pub fn next_index(&self) -> usize {
        self.next_queue.fetch_add(1, Ordering::Relaxed) % self.threads()
    }

    /// Push `group` onto the next round-robin queue.
    pub fn push_round_robin(&self, group: TaskGroup) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.queues[self.next_index()].push(group);
    }

    /// Spread `groups` over the queues in round-robin order, one lock per
    /// touched queue.
    pub fn distribute(&self, groups: Vec<TaskGroup>) {
        let threads = self.threads();
        let count = groups.len();
        let first = self.next_queue.fetch_add(count, Ordering::Relaxed);
        let width = threads.min(count);
        let mut buckets: Vec<Vec<TaskGroup>> = (0..width).map(|_| Vec::new()).collect();
        for (offset, group) in groups.into_iter().enumerate() {
            buckets[offset % width].push(group);
        }
        self.counters
            .submitted
            .fetch_add(count as u64, Ordering::Relaxed);
        for (offset, bucket) in buckets.into_iter().enumerate() {
            self.queues[first.wrapping_add(offset) % threads].extend(bucket);
        }
    }

    /// Whether any queue of the class holds work.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    /// Total number of queued groups across the class.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queues.iter().map(TaskQueue::len).sum()
    }

    /// Pop and run groups until every queue of the class is empty, starting at
    /// queue `first` and moving forward. Returns the number of groups run.
    ///
    /// A panicking task is logged and counted; its group still releases its
    /// context and draining continues.
    pub fn execute_from(&self, first: usize, arena: &mut ScratchArena) -> usize {
        self.execute_while(first, arena, || true)
    }

    /// Like [`PriorityQueue::execute_from`], but stops before popping the next
    /// group once `keep_going` returns false.
    pub fn execute_while(
        &self,
        first: usize,
        arena: &mut ScratchArena,
        keep_going: impl Fn() -> bool,
    ) -> usize {
        let threads = self.threads();
        let mut executed = 0;
        for step in 0..threads {
            let queue = &self.queues[first.wrapping_add(step) % threads];
            while keep_going() {
                let Some(group) = queue.pop() else {
                    break;
                };
                let id = group.group();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| group.execute(arena)));
                executed += 1;
                match outcome {
                    Ok(()) => {
                        self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(payload) => {
                        self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                        error!(
                            class = %self.priority,
                            group = id,
                            panic = panic_message(payload.as_ref()),
                            "Task group panicked"
                        );
                    }
                }
                drop(group);
            }
        }
        executed
    }

    /// Run `groups` in order on the calling thread, bypassing the queues.
    ///
    /// A panic is counted and then resumed on the caller. Groups after the
    /// panicking one never run; they are counted as discarded and release
    /// their context while the panic unwinds.
    pub fn execute_inline(&self, groups: Vec<TaskGroup>, arena: &mut ScratchArena) {
        self.counters
            .submitted
            .fetch_add(groups.len() as u64, Ordering::Relaxed);
        let mut groups = groups.into_iter();
        while let Some(group) = groups.next() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| group.execute(arena)));
            match outcome {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    drop(group);
                }
                Err(payload) => {
                    self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .discarded
                        .fetch_add(groups.len() as u64, Ordering::Relaxed);
                    drop(group);
                    drop(groups);
                    panic::resume_unwind(payload);
                }
            }
        }
    }

    /// Drop every queued group without running it. Each dropped group still
    /// releases its context. Returns the number of discarded groups.
    pub fn discard_all(&self) -> usize {
        let discarded: usize = self.queues.iter().map(|q| q.take_all().len()).sum();
        self.counters
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }

    /// Sleep until notified if `should_sleep` holds and no work is queued.
    /// The check runs under the wake lock, so a submitter that pushes and then
    /// notifies can never slip between check and sleep.
    pub fn sleep_if_idle(&self, should_sleep: impl Fn() -> bool) {
        let mut guard = self.wake_lock.lock();
        if should_sleep() && !self.has_work() {
            self.wake.wait(&mut guard);
        }
    }

    /// Wake one idle worker.
    pub fn notify_one(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_one();
    }

    /// Wake every idle worker.
    pub fn notify_all(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Snapshot the class counters.
    #[must_use]
    pub fn stats(&self) -> ClassStats {
        ClassStats {
            priority: self.priority,
            worker_count: self.threads(),
            queued_groups: self.queued(),
            submitted_groups: self.counters.submitted.load(Ordering::Relaxed),
            completed_groups: self.counters.completed.load(Ordering::Relaxed),
            panicked_groups: self.counters.panicked.load(Ordering::Relaxed),
            discarded_groups: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
