//! OS-level worker thread naming and placement.

use std::thread;

use tracing::{debug, warn};

use crate::core::Priority;

/// Platform hooks applied to every worker thread.
///
/// `set_name` runs on the spawning thread before the worker exists;
/// `set_priority` runs on the worker itself before it takes any work.
pub trait ThreadTuning: Send + Sync + 'static {
    /// Attach a name to the builder of a worker thread.
    fn set_name(&self, builder: thread::Builder, name: String) -> thread::Builder;

    /// Apply scheduling hints to the calling worker thread.
    fn set_priority(&self, class: Priority, worker: usize);
}

/// Leaves worker threads exactly as the OS created them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopThreadTuning;

impl ThreadTuning for NoopThreadTuning {
    fn set_name(&self, builder: thread::Builder, _name: String) -> thread::Builder {
        builder
    }

    fn set_priority(&self, _class: Priority, _worker: usize) {}
}

/// Names workers and optionally pins them to cores.
///
/// Streaming workers are placed from the last core downwards and every other
/// class from core 1 upwards, keeping core 0 for the thread that drives the
/// engine.
#[derive(Debug, Clone, Copy)]
pub struct OsThreadTuning {
    cores: usize,
    pin: bool,
}

impl OsThreadTuning {
    /// Tuning for a machine with `cores` hardware threads.
    #[must_use]
    pub const fn new(cores: usize, pin: bool) -> Self {
        Self {
            cores: if cores == 0 { 1 } else { cores },
            pin,
        }
    }

    /// Core a worker prefers, in `0..cores`.
    #[must_use]
    pub const fn preferred_core(&self, class: Priority, worker: usize) -> usize {
        match class {
            Priority::Stream => self.cores - 1 - worker % self.cores,
            Priority::Highest | Priority::Low => (worker + 1) % self.cores,
        }
    }
}

impl ThreadTuning for OsThreadTuning {
    fn set_name(&self, builder: thread::Builder, name: String) -> thread::Builder {
        builder.name(name)
    }

    fn set_priority(&self, class: Priority, worker: usize) {
        if !self.pin {
            return;
        }
        let Some(ids) = core_affinity::get_core_ids().filter(|ids| !ids.is_empty()) else {
            debug!(class = %class, worker, "Core affinity unsupported on this platform");
            return;
        };
        let core = ids[self.preferred_core(class, worker) % ids.len()];
        if core_affinity::set_for_current(core) {
            debug!(class = %class, worker, core = core.id, "Pinned worker thread");
        } else {
            warn!(class = %class, worker, core = core.id, "Failed to pin worker thread");
        }
    }
}
