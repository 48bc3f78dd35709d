//! Task records and join handles.
//!
//! A task is a boxed future plus a small wake state machine:
//!
//! ```text
//!   spawn ─► SCHEDULED ──poll──► RUNNING ──Pending──► IDLE ──wake──► SCHEDULED
//!                                  │  ▲
//!                            wake  │  │ requeue (back of global queue)
//!                                  ▼  │
//!                               NOTIFIED          RUNNING ──Ready──► COMPLETE
//! ```
//!
//! Only the `IDLE -> SCHEDULED` transition enqueues, so a task sits in at most
//! one queue at a time and is polled by at most one worker.

use super::context;
use super::shared::Shared;
use crate::error::JoinError;
use crate::tracing_compat::trace;
use crate::types::TaskId;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type AbortFn = Box<dyn FnOnce(JoinError) + Send>;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

/// Result of polling a task once.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// The future finished; the join handle has its value.
    Complete,
    /// The future panicked; the join handle has the panic message.
    Panicked(String),
    /// Pending with no wake during the poll. Some primitive holds its waker.
    Blocked,
    /// Woken during its own poll. Goes to the back of the global queue.
    Requeue,
    /// Aborted concurrently, or already finished.
    Stale,
}

pub(crate) struct Task {
    id: TaskId,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
    abort: Mutex<Option<AbortFn>>,
    shared: Weak<Shared>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        future: BoxFuture,
        abort: AbortFn,
        shared: Weak<Shared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(SCHEDULED),
            future: Mutex::new(Some(future)),
            abort: Mutex::new(Some(abort)),
            shared,
        })
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    fn observed_state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            IDLE => TaskState::Blocked,
            SCHEDULED => TaskState::Runnable,
            RUNNING | NOTIFIED => TaskState::Running,
            _ => TaskState::Completed,
        }
    }

    /// Polls the future once. Must only be called on a task popped from a
    /// run queue.
    pub(crate) fn poll(self: &Arc<Self>, slice: Duration) -> PollOutcome {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return PollOutcome::Stale;
        }

        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            self.state.store(COMPLETE, Ordering::Release);
            return PollOutcome::Stale;
        };

        let polled = {
            let _scope = context::enter_poll(self.id, slice);
            catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        match polled {
            Ok(Poll::Ready(())) => {
                let finished = slot.take();
                drop(slot);
                self.state.store(COMPLETE, Ordering::Release);
                drop_quietly(finished);
                PollOutcome::Complete
            }
            Ok(Poll::Pending) => {
                drop(slot);
                match self.state.compare_exchange(
                    RUNNING,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => PollOutcome::Blocked,
                    Err(NOTIFIED) => {
                        self.state.store(SCHEDULED, Ordering::Release);
                        PollOutcome::Requeue
                    }
                    Err(_) => PollOutcome::Stale,
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let poisoned = slot.take();
                drop(slot);
                self.state.store(COMPLETE, Ordering::Release);
                drop_quietly(poisoned);
                self.fire_abort(JoinError::Panicked(message.clone()));
                PollOutcome::Panicked(message)
            }
        }
    }

    /// Drops the future without running it further and resolves the join
    /// handle with `err`. Returns false if the task had already finished.
    pub(crate) fn abort(&self, err: JoinError) -> bool {
        if self.state.swap(COMPLETE, Ordering::AcqRel) == COMPLETE {
            return false;
        }
        let future = self.future.lock().take();
        drop_quietly(future);
        self.fire_abort(err);
        true
    }

    fn fire_abort(&self, err: JoinError) {
        let abort = self.abort.lock().take();
        if let Some(abort) = abort {
            abort(err);
        }
    }

    fn notify(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current {
                IDLE => {
                    let Some(shared) = self.shared.upgrade() else {
                        return;
                    };
                    shared.counters.begin_schedule();
                    match self.state.compare_exchange(
                        IDLE,
                        SCHEDULED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            trace!(task_id = ?self.id, "task woken");
                            shared.push_woken(Arc::clone(self));
                            return;
                        }
                        Err(actual) => {
                            shared.counters.cancel_schedule();
                            current = actual;
                        }
                    }
                }
                RUNNING => match self.state.compare_exchange(
                    RUNNING,
                    NOTIFIED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(actual) => current = actual,
                },
                _ => return,
            }
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.notify();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify();
    }
}

fn drop_quietly(future: Option<BoxFuture>) {
    if let Some(future) = future {
        let _ = catch_unwind(AssertUnwindSafe(move || drop(future)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Scheduling state of a task as seen from its [`JoinHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Queued, waiting for a worker.
    Runnable,
    /// Being polled by a worker.
    Running,
    /// Parked on a primitive until something wakes it.
    Blocked,
    /// Finished, panicked or aborted.
    Completed,
}

struct JoinInner<T> {
    result: Option<Result<T, JoinError>>,
    waker: Option<Waker>,
    taken: bool,
}

pub(crate) struct JoinState<T> {
    inner: Mutex<JoinInner<T>>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(JoinInner {
                result: None,
                waker: None,
                taken: false,
            }),
        })
    }

    /// Records the outcome. The first outcome wins.
    pub(crate) fn complete(&self, result: Result<T, JoinError>) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() || inner.taken {
            return;
        }
        inner.result = Some(result);
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Awaitable handle to a spawned task's output.
///
/// Dropping the handle detaches the task; it keeps running.
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    id: TaskId,
    state: Arc<JoinState<T>>,
    task: Weak<Task>,
}

impl<T> JoinHandle<T> {
    pub(crate) const fn new(id: TaskId, state: Arc<JoinState<T>>, task: Weak<Task>) -> Self {
        Self { id, state, task }
    }

    /// The id of the task this handle joins.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task has finished, panicked or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let inner = self.state.inner.lock();
        inner.result.is_some() || inner.taken
    }

    /// Where the task currently is in its lifecycle.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.task
            .upgrade()
            .map_or(TaskState::Completed, |task| task.observed_state())
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.state.inner.lock();
        if let Some(result) = inner.result.take() {
            inner.taken = true;
            return Poll::Ready(result);
        }
        assert!(!inner.taken, "JoinHandle polled after completion");
        match &mut inner.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            slot => *slot = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

/// Wraps `future` into a task whose output lands in the returned handle.
pub(crate) fn build<F>(future: F, shared: Weak<Shared>) -> (Arc<Task>, JoinHandle<F::Output>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id = TaskId::next();
    let state = JoinState::new();
    let on_output = Arc::clone(&state);
    let on_abort = Arc::clone(&state);
    let body: BoxFuture = Box::pin(async move {
        let out = future.await;
        on_output.complete(Ok(out));
    });
    let task = Task::new(
        id,
        body,
        Box::new(move |err| on_abort.complete(Err(err))),
        shared,
    );
    let handle = JoinHandle::new(id, state, Arc::downgrade(&task));
    (task, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached<F>(future: F) -> (Arc<Task>, JoinHandle<F::Output>)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        build(future, Weak::new())
    }

    #[test]
    fn ready_future_completes_handle() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("ready_future_completes_handle");
        let (task, handle) = detached(async { 41 + 1 });
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Complete);
        assert!(handle.is_finished());
        assert_eq!(futures_lite::future::block_on(handle), Ok(42));
        crate::test_complete!("ready_future_completes_handle");
    }

    #[test]
    fn self_wake_requests_requeue() {
        let (task, _handle) = detached(crate::runtime::yield_now());
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Requeue);
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Complete);
    }

    #[test]
    fn panic_is_captured() {
        let (task, handle) = detached(async {
            panic!("kaboom");
        });
        assert_eq!(
            task.poll(Duration::from_secs(1)),
            PollOutcome::Panicked("kaboom".to_string())
        );
        let err = futures_lite::future::block_on(handle).unwrap_err();
        assert_eq!(err, JoinError::Panicked("kaboom".to_string()));
    }

    #[test]
    fn abort_resolves_handle_once() {
        let (task, handle) = detached(std::future::pending::<()>());
        assert!(task.abort(JoinError::Shutdown));
        assert!(!task.abort(JoinError::Deadlock));
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Stale);
        assert_eq!(
            futures_lite::future::block_on(handle),
            Err(JoinError::Shutdown)
        );
    }

    #[test]
    fn blocked_task_without_runtime_stays_idle() {
        let (task, handle) = detached(std::future::pending::<()>());
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Blocked);
        Waker::from(Arc::clone(&task)).wake();
        assert!(!handle.is_finished());
        assert_eq!(handle.state(), TaskState::Blocked);
    }

    #[test]
    fn state_follows_lifecycle() {
        let (task, handle) = detached(crate::runtime::yield_now());
        assert_eq!(handle.state(), TaskState::Runnable);
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Requeue);
        assert_eq!(handle.state(), TaskState::Runnable);
        assert_eq!(task.poll(Duration::from_secs(1)), PollOutcome::Complete);
        assert_eq!(handle.state(), TaskState::Completed);
        drop(task);
        assert_eq!(handle.state(), TaskState::Completed);
    }
}
