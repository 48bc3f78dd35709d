//! Global deadlock detection.
//!
//! The driver thread samples the runtime counters every
//! `deadlock_check_interval`. A sample is *idle* when there are live tasks
//! but none queued or running, no timer pending (on the runtime's driver
//! or the standalone one, which serves deadlines set outside any runtime)
//! and no [`ExternalSource`] held. Two consecutive idle samples with the same scheduling epoch mean
//! nothing happened between them and nothing can happen any more: the
//! runtime declares a deadlock.
//!
//! Threads outside the runtime that will later send on a channel or cancel
//! a context (without a deadline) must hold an [`ExternalSource`], otherwise
//! tasks waiting on them look deadlocked.

use super::shared::Shared;
use crate::time::driver;
use crate::tracing_compat::trace;
use crate::types::TaskId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Snapshot of the runtime when a deadlock was declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadlockReport {
    blocked: Vec<TaskId>,
}

impl DeadlockReport {
    pub(crate) const fn new(blocked: Vec<TaskId>) -> Self {
        Self { blocked }
    }

    /// Ids of every task that was blocked, ascending.
    #[must_use]
    pub fn blocked(&self) -> &[TaskId] {
        &self.blocked
    }

    /// Number of live tasks at detection time.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.blocked.len()
    }
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadlock: all {} live tasks are blocked", self.blocked.len())?;
        if !self.blocked.is_empty() {
            write!(f, " (")?;
            for (i, id) in self.blocked.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{id}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeadlockMonitor {
    idle_epoch: Option<u64>,
}

impl DeadlockMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes one sample. Declares the deadlock on the second matching one.
    pub(crate) fn tick(&mut self, shared: &Shared) {
        if shared.is_shutdown() {
            return;
        }
        let counters = &shared.counters;
        let live = counters.live.load(Ordering::Acquire);
        let active = counters.active.load(Ordering::Acquire);
        let external = counters.external.load(Ordering::Acquire);
        let timers = shared.timer().pending_count() + driver::fallback_pending();
        let epoch = counters.epoch.load(Ordering::Acquire);

        let idle = live > 0 && active == 0 && external == 0 && timers == 0;
        if !idle {
            self.idle_epoch = None;
            return;
        }
        match self.idle_epoch {
            Some(seen) if seen == epoch => {
                shared.declare_deadlock(DeadlockReport::new(shared.live_task_ids()));
            }
            _ => {
                trace!(live, epoch, "runtime idle with blocked tasks");
                self.idle_epoch = Some(epoch);
            }
        }
    }
}

/// Marks a wakeup source outside the runtime.
///
/// While any guard is alive the deadlock detector stays quiet. Dropping the
/// guard counts as activity.
#[must_use = "the source is released when the guard is dropped"]
pub struct ExternalSource {
    shared: Arc<Shared>,
}

impl ExternalSource {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        shared.counters.external.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }
}

impl fmt::Debug for ExternalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSource").finish_non_exhaustive()
    }
}

impl Drop for ExternalSource {
    fn drop(&mut self) {
        self.shared.counters.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.counters.external.fetch_sub(1, Ordering::AcqRel);
    }
}
