//! Task groups, their per-index arguments and the worker scratch arena.

use std::fmt;
use std::sync::Arc;

use super::ExecutionContext;

/// Arguments handed to a task for one index of a submission.
///
/// `shared` borrows the executing thread's scratch arena for the duration of
/// a single call. Every index of a group sees the same bytes, so a group can
/// accumulate into it, but the contents are unspecified when the group starts:
/// nothing is zeroed and leftovers from unrelated groups may remain.
#[derive(Debug)]
pub struct TaskArguments<'a> {
    /// Index across the whole submission.
    pub index: usize,
    /// Group this index belongs to.
    pub group: usize,
    /// Index relative to the start of the group.
    pub group_index: usize,
    /// Whether this is the first index of the group.
    pub first: bool,
    /// Whether this is the last index of the group.
    pub last: bool,
    /// Scratch bytes shared by the group, `None` when none were requested.
    pub shared: Option<&'a mut [u8]>,
}

/// Work closure shared by every group of one submission.
pub type TaskFn = Arc<dyn Fn(TaskArguments<'_>) + Send + Sync + 'static>;

/// Number of groups needed to cover `jobs` indices with groups of
/// `group_size`. Returns 0 when either argument is 0.
///
/// ```
/// assert_eq!(shadow_jobs::dispatch_groups(10, 3), 4);
/// assert_eq!(shadow_jobs::dispatch_groups(9, 3), 3);
/// assert_eq!(shadow_jobs::dispatch_groups(10, 0), 0);
/// ```
#[must_use]
pub const fn dispatch_groups(jobs: usize, group_size: usize) -> usize {
    if group_size == 0 {
        return 0;
    }
    jobs.div_ceil(group_size)
}

/// Growable byte buffer reused across the groups one thread executes.
#[derive(Debug, Default)]
pub struct ScratchArena {
    bytes: Vec<u8>,
}

impl ScratchArena {
    /// Create an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Current backing size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Borrow `len` bytes, growing the arena if needed. Existing contents are
    /// left as they are.
    pub fn slice(&mut self, len: usize) -> Option<&mut [u8]> {
        if len == 0 {
            return None;
        }
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        Some(&mut self.bytes[..len])
    }
}

/// Unit of scheduling: one closure over a contiguous index range.
///
/// A group releases exactly one pending count on its context when it is
/// dropped, whether it ran, panicked or was discarded unexecuted. Its closure
/// is released first, so a waiter that sees the context idle never races the
/// closure's captures. Executors drop the group only after their own
/// bookkeeping, so that bookkeeping is visible too.
pub struct TaskGroup {
    work: Option<TaskFn>,
    context: ExecutionContext,
    group: usize,
    start: usize,
    end: usize,
    shared_bytes: usize,
}

impl TaskGroup {
    /// Build a group covering `[start, end)`. The caller must already have
    /// counted this group on `context`.
    pub(crate) fn new(
        work: TaskFn,
        context: ExecutionContext,
        group: usize,
        start: usize,
        end: usize,
        shared_bytes: usize,
    ) -> Self {
        Self {
            work: Some(work),
            context,
            group,
            start,
            end,
            shared_bytes,
        }
    }

    /// Group id within its submission.
    #[must_use]
    pub const fn group(&self) -> usize {
        self.group
    }

    /// Index range covered by this group.
    #[must_use]
    pub const fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Run the closure once per index. The context is released when the
    /// group is dropped.
    pub fn execute(&self, arena: &mut ScratchArena) {
        let Some(work) = &self.work else {
            return;
        };
        for index in self.start..self.end {
            let args = TaskArguments {
                index,
                group: self.group,
                group_index: index - self.start,
                first: index == self.start,
                last: index + 1 == self.end,
                shared: arena.slice(self.shared_bytes),
            };
            work(args);
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        drop(self.work.take());
        self.context.complete_one();
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("group", &self.group)
            .field("range", &self.range())
            .field("shared_bytes", &self.shared_bytes)
            .field("priority", &self.context.priority())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Priority;
    use parking_lot::Mutex;

    fn counted_group(
        ctx: &ExecutionContext,
        work: TaskFn,
        group: usize,
        start: usize,
        end: usize,
        shared: usize,
    ) -> TaskGroup {
        ctx.add_pending(1);
        TaskGroup::new(work, ctx.clone(), group, start, end, shared)
    }

    #[test]
    fn test_dispatch_groups() {
        assert_eq!(dispatch_groups(10, 3), 4);
        assert_eq!(dispatch_groups(1, 1), 1);
        assert_eq!(dispatch_groups(0, 4), 0);
        assert_eq!(dispatch_groups(4, 0), 0);
        assert_eq!(dispatch_groups(7, 100), 1);
    }

    #[test]
    fn test_group_arguments() {
        let ctx = ExecutionContext::new(Priority::Highest);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let work: TaskFn = Arc::new(move |args: TaskArguments<'_>| {
            sink.lock()
                .push((args.index, args.group, args.group_index, args.first, args.last));
        });

        let group = counted_group(&ctx, work, 3, 9, 12, 0);
        assert_eq!(ctx.pending(), 1);
        group.execute(&mut ScratchArena::new());
        assert_eq!(ctx.pending(), 1);
        drop(group);

        assert_eq!(ctx.pending(), 0);
        assert_eq!(
            *seen.lock(),
            vec![
                (9, 3, 0, true, false),
                (10, 3, 1, false, false),
                (11, 3, 2, false, true),
            ]
        );
    }

    #[test]
    fn test_shared_bytes_persist_within_group() {
        let ctx = ExecutionContext::default();
        let total = Arc::new(Mutex::new(0u32));
        let out = Arc::clone(&total);
        let work: TaskFn = Arc::new(move |args: TaskArguments<'_>| {
            let Some(shared) = args.shared else {
                panic!("shared buffer missing");
            };
            assert_eq!(shared.len(), 4);
            if args.first {
                shared.fill(0);
            }
            let value = u32::from_le_bytes([shared[0], shared[1], shared[2], shared[3]]) + 1;
            shared.copy_from_slice(&value.to_le_bytes());
            if args.last {
                *out.lock() = value;
            }
        });

        let mut arena = ScratchArena::new();
        counted_group(&ctx, work, 0, 0, 5, 4).execute(&mut arena);
        assert_eq!(*total.lock(), 5);
        assert_eq!(arena.capacity(), 4);
    }

    #[test]
    fn test_no_shared_bytes_means_none() {
        let ctx = ExecutionContext::default();
        let work: TaskFn = Arc::new(|args: TaskArguments<'_>| assert!(args.shared.is_none()));
        counted_group(&ctx, work, 0, 0, 2, 0).execute(&mut ScratchArena::new());
        assert!(!ctx.is_working());
    }

    #[test]
    fn test_dropping_group_releases_context() {
        let ctx = ExecutionContext::default();
        let work: TaskFn = Arc::new(|_: TaskArguments<'_>| panic!("must not run"));
        let group = counted_group(&ctx, work, 0, 0, 1, 0);
        assert!(ctx.is_working());
        drop(group);
        assert!(!ctx.is_working());
    }

    #[test]
    fn test_panicking_group_releases_context() {
        let ctx = ExecutionContext::default();
        let work: TaskFn = Arc::new(|_: TaskArguments<'_>| panic!("boom"));
        let group = counted_group(&ctx, work, 0, 0, 1, 0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            group.execute(&mut ScratchArena::new());
        }));
        assert!(result.is_err());
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn test_closure_released_before_context() {
        struct Capture {
            ctx: ExecutionContext,
            released_while_pending: Arc<Mutex<Option<bool>>>,
        }

        impl Drop for Capture {
            fn drop(&mut self) {
                *self.released_while_pending.lock() = Some(self.ctx.is_working());
            }
        }

        let ctx = ExecutionContext::default();
        let seen = Arc::new(Mutex::new(None));
        let capture = Capture {
            ctx: ctx.clone(),
            released_while_pending: Arc::clone(&seen),
        };
        let work: TaskFn = Arc::new(move |_: TaskArguments<'_>| {
            let _ = &capture;
        });

        let group = counted_group(&ctx, work, 0, 0, 1, 0);
        group.execute(&mut ScratchArena::new());
        drop(group);

        assert_eq!(*seen.lock(), Some(true));
        assert!(!ctx.is_working());
    }

    #[test]
    fn test_arena_grows_and_keeps_size() {
        let mut arena = ScratchArena::new();
        assert!(arena.slice(0).is_none());
        assert_eq!(arena.slice(16).map(|s| s.len()), Some(16));
        assert_eq!(arena.slice(8).map(|s| s.len()), Some(8));
        assert_eq!(arena.capacity(), 16);
    }
}
