//! Priority classes and the caller-owned completion token.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// A scheduling class. Every class owns a disjoint set of worker threads.
///
/// Classes do not preempt each other: a long-running `Low` task keeps its
/// thread until it returns, even while `Highest` work is queued. Isolation
/// comes only from the classes never sharing workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Default class, sized to all cores but one.
    #[default]
    Highest,
    /// Background work that should not compete with `Highest`.
    Low,
    /// Resource streaming. Always a single thread.
    Stream,
}

impl Priority {
    /// Every class, in class-index order.
    pub const ALL: [Self; 3] = [Self::Highest, Self::Low, Self::Stream];

    /// Number of priority classes.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of this class in [`Priority::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Highest => 0,
            Self::Low => 1,
            Self::Stream => 2,
        }
    }

    /// Natural thread share of this class for a machine with `cores` hardware
    /// threads, before clamping.
    #[must_use]
    pub const fn natural_threads(self, cores: usize) -> usize {
        match self {
            Self::Highest => cores.saturating_sub(1),
            Self::Low => cores.saturating_sub(2),
            Self::Stream => 1,
        }
    }

    /// Short lowercase name used in thread names and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Highest => "highest",
            Self::Low => "low",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ContextInner {
    pending: AtomicUsize,
    priority: Priority,
    /// Parking spot for waiters that stopped spinning.
    idle: Mutex<()>,
    done: Condvar,
}

/// Completion token for one logical batch of work.
///
/// The pending count equals the number of task groups submitted under this
/// context that have not finished. Clones share the same count, so a handle
/// can be moved into closures or kept by several subsystems at once.
///
/// ```
/// use shadow_jobs::{ExecutionContext, Priority};
///
/// let ctx = ExecutionContext::new(Priority::Low);
/// assert!(!ctx.is_working());
/// assert_eq!(ctx.priority(), Priority::Low);
/// ```
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Create an idle context bound to `priority`.
    #[must_use]
    pub fn new(priority: Priority) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                pending: AtomicUsize::new(0),
                priority,
                idle: Mutex::new(()),
                done: Condvar::new(),
            }),
        }
    }

    /// Priority class this context submits to.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Snapshot of the number of unfinished groups.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Whether any submitted group is still unfinished. This is a snapshot and
    /// is not synchronized with concurrent submissions.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.pending() > 0
    }

    /// Whether two handles refer to the same context.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn add_pending(&self, groups: usize) {
        self.inner.pending.fetch_add(groups, Ordering::AcqRel);
    }

    /// Mark one group finished and wake parked waiters on the last one.
    pub(crate) fn complete_one(&self) {
        let previous = self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "execution context pending count underflow");
        if previous == 1 {
            // Taking the lock orders this notify after any waiter's check.
            let _guard = self.inner.idle.lock();
            self.inner.done.notify_all();
        }
    }

    /// Park until the count reaches zero. `slice` bounds each sleep.
    pub(crate) fn park_until_idle(&self, slice: Duration) {
        let mut guard = self.inner.idle.lock();
        while self.is_working() {
            self.inner.done.wait_for(&mut guard, slice);
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Priority::default())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("priority", &self.priority())
            .field("pending", &self.pending())
            .finish()
    }
}
