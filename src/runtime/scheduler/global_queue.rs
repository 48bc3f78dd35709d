//! Global injection queue.
//!
//! Unbounded FIFO for tasks spawned or woken off-worker, and for tasks that
//! woke themselves during a poll and must go behind everyone else.

use crate::runtime::task::Task;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct GlobalQueue {
    inner: SegQueue<Arc<Task>>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
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

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
