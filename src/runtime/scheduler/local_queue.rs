//! Per-worker run queue.
//!
//! FIFO on the owner side so tasks woken on a worker run in wake order.
//! Thieves take roughly half the queue in one batch.

use crate::runtime::task::Task;
use crossbeam_deque::{Steal, Worker};
use std::sync::Arc;

pub(crate) struct LocalQueue {
    inner: Worker<Arc<Task>>,
}

/// Thief side of a [`LocalQueue`].
#[derive(Clone)]
pub(crate) struct Stealer {
    inner: crossbeam_deque::Stealer<Arc<Task>>,
}

impl LocalQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Worker::new_fifo(),
        }
    }

    pub(crate) fn stealer(&self) -> Stealer {
        Stealer {
            inner: self.inner.stealer(),
        }
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        self.inner.push(task);
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Stealer {
    /// Moves about half of the victim's tasks into `dest` and returns one.
    pub(crate) fn steal_into(&self, dest: &LocalQueue) -> Option<Arc<Task>> {
        loop {
            match self.inner.steal_batch_and_pop(&dest.inner) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
