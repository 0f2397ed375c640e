//! Worker threads and the state they share with the scheduler handle.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::debug;
use uuid::Uuid;

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::util::ThreadTuning;

use super::{Priority, PriorityQueue, ScratchArena};

thread_local! {
    /// Scheduler id, class and index of the worker running on this thread.
    static CURRENT_WORKER: Cell<Option<(Uuid, Priority, usize)>> = const { Cell::new(None) };
}

/// Class and index of the calling thread if it is a worker of scheduler `id`.
pub(crate) fn current_worker(id: Uuid) -> Option<(Priority, usize)> {
    CURRENT_WORKER
        .with(Cell::get)
        .and_then(|(owner, class, worker)| (owner == id).then_some((class, worker)))
}

/// State shared by the scheduler handle and every worker thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub id: Uuid,
    pub alive: AtomicBool,
    pub policy: ShutdownPolicy,
    pub classes: [PriorityQueue; Priority::COUNT],
}

impl Shared {
    pub fn new(counts: [usize; Priority::COUNT], policy: ShutdownPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            alive: AtomicBool::new(true),
            policy,
            classes: Priority::ALL.map(|p| PriorityQueue::new(p, counts[p.index()])),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub const fn class(&self, priority: Priority) -> &PriorityQueue {
        &self.classes[priority.index()]
    }

    /// Whether a worker should pop another group.
    fn keeps_executing(&self) -> bool {
        self.is_alive() || self.policy == ShutdownPolicy::Drain
    }
}

/// Identity a worker reports when it leaves its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerExit {
    pub class: Priority,
    pub worker: usize,
}

/// Join handle of a spawned worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub class: Priority,
    pub worker: usize,
    pub handle: JoinHandle<()>,
}

/// Spawn worker `worker` of `class`.
pub(crate) fn spawn_worker(
    shared: &Arc<Shared>,
    class: Priority,
    worker: usize,
    config: &SchedulerConfig,
    tuning: &Arc<dyn ThreadTuning>,
    exits: Sender<WorkerExit>,
) -> std::io::Result<WorkerHandle> {
    let mut builder = thread::Builder::new();
    if let Some(bytes) = config.thread_stack_size {
        builder = builder.stack_size(bytes);
    }
    let name = format!("{}-{class}-{worker}", config.thread_name_prefix);
    let builder = tuning.set_name(builder, name);

    let shared = Arc::clone(shared);
    let tuning = Arc::clone(tuning);
    let handle = builder.spawn(move || {
        CURRENT_WORKER.with(|slot| slot.set(Some((shared.id, class, worker))));
        tuning.set_priority(class, worker);
        worker_loop(&shared, class, worker);
        // The scheduler may have stopped listening already.
        let _ = exits.send(WorkerExit { class, worker });
    })?;

    Ok(WorkerHandle {
        class,
        worker,
        handle,
    })
}

/// Drain, sleep, repeat until the scheduler goes down.
fn worker_loop(shared: &Shared, class: Priority, worker: usize) {
    let queue = shared.class(class);
    let mut arena = ScratchArena::new();
    debug!(scheduler = %shared.id, class = %class, worker, "Worker thread started");

    while shared.is_alive() {
        queue.execute_while(worker, &mut arena, || shared.keeps_executing());
        queue.sleep_if_idle(|| shared.is_alive());
    }

    let drained = queue.execute_while(worker, &mut arena, || shared.keeps_executing());
    debug!(
        scheduler = %shared.id,
        class = %class,
        worker,
        drained,
        "Worker thread exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionContext, TaskArguments, TaskFn, TaskGroup};
    use crate::util::NoopThreadTuning;
    use std::sync::atomic::AtomicUsize;

    fn counting_group(ctx: &ExecutionContext, hits: &Arc<AtomicUsize>) -> TaskGroup {
        let hits = Arc::clone(hits);
        let work: TaskFn = Arc::new(move |_: TaskArguments<'_>| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        ctx.add_pending(1);
        TaskGroup::new(work, ctx.clone(), 0, 0, 1, 0)
    }

    #[test]
    fn test_worker_runs_queued_work_and_exits() {
        let shared = Arc::new(Shared::new([1, 1, 1], ShutdownPolicy::Drain));
        let tuning: Arc<dyn ThreadTuning> = Arc::new(NoopThreadTuning);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_worker(
            &shared,
            Priority::Low,
            0,
            &SchedulerConfig::default(),
            &tuning,
            tx,
        )
        .unwrap();

        let ctx = ExecutionContext::new(Priority::Low);
        let hits = Arc::new(AtomicUsize::new(0));
        shared.class(Priority::Low).push_round_robin(counting_group(&ctx, &hits));
        shared.class(Priority::Low).notify_one();
        while ctx.is_working() {
            thread::yield_now();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        shared.alive.store(false, Ordering::Release);
        shared.class(Priority::Low).notify_all();
        let exit = rx.recv().unwrap();
        assert_eq!(
            exit,
            WorkerExit {
                class: Priority::Low,
                worker: 0
            }
        );
        handle.handle.join().unwrap();
    }

    #[test]
    fn test_current_worker_marks_only_own_threads() {
        let shared = Arc::new(Shared::new([1, 1, 1], ShutdownPolicy::Drain));
        assert_eq!(current_worker(shared.id), None);

        let tuning: Arc<dyn ThreadTuning> = Arc::new(NoopThreadTuning);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_worker(
            &shared,
            Priority::Stream,
            0,
            &SchedulerConfig::default(),
            &tuning,
            tx,
        )
        .unwrap();

        let ctx = ExecutionContext::new(Priority::Stream);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let (sink, id) = (Arc::clone(&seen), shared.id);
        let work: TaskFn = Arc::new(move |_: TaskArguments<'_>| {
            *sink.lock() = Some((current_worker(id), current_worker(Uuid::new_v4())));
        });
        ctx.add_pending(1);
        let queue = shared.class(Priority::Stream);
        queue.push_round_robin(TaskGroup::new(work, ctx.clone(), 0, 0, 1, 0));
        queue.notify_one();
        while ctx.is_working() {
            thread::yield_now();
        }
        assert_eq!(*seen.lock(), Some((Some((Priority::Stream, 0)), None)));

        shared.alive.store(false, Ordering::Release);
        queue.notify_all();
        rx.recv().unwrap();
        handle.handle.join().unwrap();
    }

    #[test]
    fn test_keeps_executing_follows_policy() {
        let drain = Shared::new([1, 1, 1], ShutdownPolicy::Drain);
        let discard = Shared::new([1, 1, 1], ShutdownPolicy::Discard);
        drain.alive.store(false, Ordering::Release);
        discard.alive.store(false, Ordering::Release);
        assert!(drain.keeps_executing());
        assert!(!discard.keeps_executing());
    }
}
