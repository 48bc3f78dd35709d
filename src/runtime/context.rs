//! Thread-local runtime context.
//!
//! A worker thread installs its [`WorkerCore`] for the lifetime of its run
//! loop. While a task is being polled the worker also installs a
//! [`PollScope`] naming the task and when the poll started, which the coop
//! budget and [`TaskId::current`](crate::types::TaskId::current) read.

use super::Handle;
use super::scheduler::worker::WorkerCore;
use super::shared::Shared;
use super::task::Task;
use crate::types::TaskId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

thread_local! {
    static WORKER: RefCell<Option<Rc<WorkerCore>>> = const { RefCell::new(None) };
    static POLL: Cell<Option<PollScope>> = const { Cell::new(None) };
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PollScope {
    pub(crate) task: TaskId,
    pub(crate) started: Instant,
    pub(crate) slice: Duration,
}

pub(crate) struct WorkerGuard {
    _private: (),
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        WORKER.with(|w| w.borrow_mut().take());
    }
}

pub(crate) fn enter_worker(core: Rc<WorkerCore>) -> WorkerGuard {
    WORKER.with(|w| *w.borrow_mut() = Some(core));
    WorkerGuard { _private: () }
}

pub(crate) struct PollGuard {
    previous: Option<PollScope>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        POLL.with(|p| p.set(self.previous));
    }
}

pub(crate) fn enter_poll(task: TaskId, slice: Duration) -> PollGuard {
    let scope = PollScope {
        task,
        started: Instant::now(),
        slice,
    };
    let previous = POLL.with(|p| p.replace(Some(scope)));
    PollGuard { previous }
}

/// Id of the task being polled on this thread.
pub(crate) fn current_task() -> Option<TaskId> {
    POLL.with(|p| p.get().map(|s| s.task))
}

/// True once the current poll has run past its time slice.
pub(crate) fn slice_exhausted() -> bool {
    POLL.with(|p| {
        p.get()
            .is_some_and(|scope| scope.started.elapsed() >= scope.slice)
    })
}

pub(crate) fn in_worker() -> bool {
    WORKER.with(|w| w.borrow().is_some())
}

pub(crate) fn current_handle() -> Option<Handle> {
    WORKER.with(|w| {
        w.borrow().as_ref().map(|core| Handle {
            shared: Arc::clone(&core.shared),
        })
    })
}

pub(crate) fn with_current_shared<R>(f: impl FnOnce(&Shared) -> R) -> Option<R> {
    WORKER.with(|w| w.borrow().as_ref().map(|core| f(&core.shared)))
}

/// Pushes onto this thread's local queue if this thread is a worker of
/// `shared`. Hands the task back otherwise.
pub(crate) fn try_push_local(shared: &Shared, task: Arc<Task>) -> Option<Arc<Task>> {
    WORKER.with(|w| match w.borrow().as_ref() {
        Some(core) if std::ptr::eq(Arc::as_ptr(&core.shared), shared) => {
            core.local.push(task);
            None
        }
        _ => Some(task),
    })
}
