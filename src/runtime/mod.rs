//! Task runtime.
//!
//! A [`Runtime`] owns N worker threads and one driver thread. Tasks are
//! spawned through a [`Handle`] and joined through a [`JoinHandle`].
//!
//! # Scheduling
//!
//! - A task woken on a worker goes to that worker's local FIFO queue.
//! - A task woken elsewhere (timer thread, foreign thread) goes to the
//!   global queue.
//! - A task that wakes itself while being polled (yield, exhausted time
//!   slice) goes to the back of the global queue.
//! - Idle workers steal half of a random peer's local queue.
//!
//! # Deadlock
//!
//! When every live task is blocked and nothing can wake any of them, the
//! runtime fails all of them with `JoinError::Deadlock` and
//! [`Runtime::block_on`] returns `RuntimeError::Deadlock`. See
//! [`ExternalSource`] for wakeups that originate outside the runtime.

mod builder;
pub(crate) mod context;
pub(crate) mod coop;
mod deadlock;
pub(crate) mod scheduler;
pub(crate) mod shared;
pub(crate) mod task;
mod yield_now;

pub use builder::RuntimeBuilder;
pub use deadlock::{DeadlockReport, ExternalSource};
pub use task::{JoinHandle, TaskState};
pub use yield_now::{YieldNow, yield_now};

use crate::channel::{self, Receiver, Sender};
use crate::config::RuntimeConfig;
use crate::error::{JoinError, RuntimeError};
use crate::time::TimerDriver;
use crate::tracing_compat::{error, info, warn};
use shared::Shared;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle as ThreadHandle;

/// A running runtime. Dropping it shuts the runtime down.
pub struct Runtime {
    handle: Handle,
    workers: Vec<ThreadHandle<()>>,
    driver: Option<ThreadHandle<()>>,
    stopped: bool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Builds a runtime with default configuration.
    pub fn new() -> Result<Self, RuntimeError> {
        RuntimeBuilder::new().build()
    }

    pub(crate) const fn from_parts(
        handle: Handle,
        workers: Vec<ThreadHandle<()>>,
        driver: Option<ThreadHandle<()>>,
    ) -> Self {
        Self {
            handle,
            workers,
            driver,
            stopped: false,
        }
    }

    /// A cloneable handle for spawning onto this runtime.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Spawns a task. Shorthand for `self.handle().spawn(future)`.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` as the root task and blocks the calling thread until it
    /// completes.
    ///
    /// Returns `RuntimeError::Deadlock` if the runtime deadlocks first, and
    /// `RuntimeError::Join` if the root task panics.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if context::in_worker() {
            return Err(RuntimeError::BlockOnInsideRuntime);
        }
        let root = self.handle.spawn(future);
        match futures_lite::future::block_on(root) {
            Ok(out) => Ok(out),
            Err(JoinError::Deadlock) => Err(RuntimeError::Deadlock(
                self.handle.shared.deadlock_report().unwrap_or_default(),
            )),
            Err(err) => Err(RuntimeError::Join(err)),
        }
    }

    /// Stops all threads and aborts unfinished tasks. Returns how many tasks
    /// were still live.
    pub fn shutdown(mut self) -> usize {
        self.stop()
    }

    fn stop(&mut self) -> usize {
        if self.stopped {
            return 0;
        }
        self.stopped = true;
        let shared = &self.handle.shared;
        shared.begin_shutdown();
        let me = std::thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != me {
                join_thread(worker);
            }
        }
        shared.timer().shutdown();
        if let Some(driver) = self.driver.take() {
            if driver.thread().id() != me {
                join_thread(driver);
            }
        }
        let orphans = shared.abort_all(&JoinError::Shutdown);
        if orphans > 0 {
            warn!(orphaned = orphans, "runtime shut down with unfinished tasks");
        }
        info!("runtime shut down");
        orphans
    }
}

/// Joins a runtime thread. Returns false, after logging, if it panicked.
fn join_thread(thread: ThreadHandle<()>) -> bool {
    let name = thread.thread().name().unwrap_or("unnamed").to_string();
    match thread.join() {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&'static str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(thread = %name, panic = %message, "runtime thread panicked");
            false
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cheap, cloneable reference to a runtime.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("workers", &self.shared.stealers().len())
            .finish_non_exhaustive()
    }
}

impl Handle {
    /// Handle of the runtime whose worker is running the caller.
    ///
    /// # Panics
    ///
    /// Panics outside a runtime worker. Use [`Handle::try_current`] to probe.
    #[must_use]
    pub fn current() -> Self {
        Self::try_current().expect("Handle::current called outside a strand runtime")
    }

    /// Handle of the current runtime, if the caller runs on one of its workers.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        context::current_handle()
    }

    /// Spawns a task. Its output is delivered through the returned handle.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (task, handle) = task::build(future, Arc::downgrade(&self.shared));
        self.shared.spawn(task);
        handle
    }

    /// Creates a channel with the configured `default_channel_capacity`.
    #[must_use]
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        channel::bounded(self.shared.config.default_channel_capacity)
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// The timer driver serving this runtime.
    #[must_use]
    pub fn timer(&self) -> &TimerDriver {
        self.shared.timer()
    }

    /// Registers a wakeup source outside the runtime. See [`ExternalSource`].
    pub fn external_source(&self) -> ExternalSource {
        ExternalSource::new(Arc::clone(&self.shared))
    }

    /// The deadlock report, once one has been declared.
    #[must_use]
    pub fn deadlock_report(&self) -> Option<DeadlockReport> {
        self.shared.deadlock_report()
    }

    /// True after shutdown started or a deadlock was declared.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        let c = &self.shared.counters;
        RuntimeStats {
            workers: self.shared.stealers().len(),
            live_tasks: c.live.load(Ordering::Relaxed),
            active_tasks: c.active.load(Ordering::Relaxed),
            spawned: c.spawned.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            steals: c.steals.load(Ordering::Relaxed),
            preemptions: c.preemptions.load(Ordering::Relaxed),
            pending_timers: self.shared.timer().pending_count(),
            global_queue_len: self.shared.global().len(),
        }
    }
}

/// Spawns onto the current runtime.
///
/// # Panics
///
/// Panics outside a runtime worker.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Handle::current().spawn(future)
}

/// Runtime counters returned by [`Handle::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Worker thread count.
    pub workers: usize,
    /// Tasks spawned and not yet finished.
    pub live_tasks: usize,
    /// Tasks queued or running.
    pub active_tasks: usize,
    /// Total tasks spawned.
    pub spawned: u64,
    /// Total tasks completed, including panicked ones.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
    /// Successful steals.
    pub steals: u64,
    /// Forced yields after an exhausted time slice.
    pub preemptions: u64,
    /// Timers registered and not yet fired.
    pub pending_timers: usize,
    /// Tasks waiting in the global queue.
    pub global_queue_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, test_runtime};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn block_on_returns_root_value() {
        init_test_logging();
        crate::test_phase!("block_on_returns_root_value");
        let rt = test_runtime(2);
        let out = rt.block_on(async { 6 * 7 }).expect("root value");
        crate::assert_with_log!(out == 42, "root value", 42, out);
        crate::test_complete!("block_on_returns_root_value");
    }

    #[test]
    fn spawned_tasks_join_with_values() {
        init_test_logging();
        let rt = test_runtime(4);
        let handle = rt.handle();
        let sum = rt
            .block_on(async move {
                let joins: Vec<_> = (0..32_u64).map(|i| handle.spawn(async move { i })).collect();
                let mut sum = 0;
                for join in joins {
                    sum += join.await.expect("task value");
                }
                sum
            })
            .expect("root");
        assert_eq!(sum, (0..32).sum());
        assert_eq!(rt.handle().stats().spawned, 33);
    }

    #[test]
    fn panic_surfaces_as_join_error() {
        init_test_logging();
        let rt = test_runtime(2);
        let h = rt.handle();
        let err = rt
            .block_on(async move {
                h.spawn(async {
                    panic!("task failure");
                })
                .await
            })
            .expect("root survives child panic");
        assert_eq!(err, Err(JoinError::Panicked("task failure".to_string())));
        assert_eq!(rt.handle().stats().panicked, 1);
    }

    #[test]
    fn root_panic_is_reported() {
        let rt = test_runtime(1);
        let err = rt
            .block_on(async {
                panic!("root failure");
            })
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Join(JoinError::Panicked(_))));
    }

    #[test]
    fn handle_current_inside_task() {
        let rt = test_runtime(2);
        let seen = rt
            .block_on(async {
                Handle::try_current().is_some() && crate::TaskId::current().is_some()
            })
            .expect("root");
        assert!(seen);
        assert!(Handle::try_current().is_none());
    }

    #[test]
    fn yield_now_lets_others_run() {
        init_test_logging();
        let rt = test_runtime(1);
        let handle = rt.handle();
        let order = rt
            .block_on(async move {
                let counter = Arc::new(AtomicUsize::new(0));
                let c = Arc::clone(&counter);
                let other = handle.spawn(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                });
                yield_now().await;
                let seen = counter.load(Ordering::SeqCst);
                other.await.expect("other");
                seen
            })
            .expect("root");
        assert_eq!(order, 1);
    }

    #[test]
    fn shutdown_reports_orphans() {
        init_test_logging();
        let rt = RuntimeBuilder::new()
            .worker_threads(1)
            .deadlock_check_interval(None)
            .build()
            .expect("runtime");
        let stuck = rt.spawn(std::future::pending::<()>());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rt.shutdown(), 1);
        assert_eq!(
            futures_lite::future::block_on(stuck),
            Err(JoinError::Shutdown)
        );
    }

    #[test]
    fn block_on_inside_worker_is_rejected() {
        let rt = Arc::new(test_runtime(1));
        let inner = Arc::clone(&rt);
        let nested = rt
            .block_on(async move { inner.block_on(async {}).is_err() })
            .expect("root");
        assert!(nested);
    }

    #[test]
    fn panicked_runtime_thread_is_reported_on_join() {
        init_test_logging();
        let healthy = std::thread::spawn(|| {});
        assert!(join_thread(healthy));
        let broken = std::thread::Builder::new()
            .name("strand-worker-test".to_string())
            .spawn(|| panic!("worker loop failed"))
            .expect("spawn");
        assert!(!join_thread(broken));
    }

    #[test]
    fn spawn_after_shutdown_fails_fast() {
        let rt = test_runtime(1);
        let handle = rt.handle();
        drop(rt);
        let join = handle.spawn(async { 1 });
        assert_eq!(
            futures_lite::future::block_on(join),
            Err(JoinError::Shutdown)
        );
    }
}
