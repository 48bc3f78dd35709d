//! Identifier types for runtime entities.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a spawned task.
///
/// Ids are process-wide and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id of the task currently being polled on this thread.
    ///
    /// `None` outside a runtime worker, or between polls.
    #[must_use]
    pub fn current() -> Option<Self> {
        crate::runtime::context::current_task()
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
