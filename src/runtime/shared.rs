//! State shared by every worker, the driver thread and all handles.

use super::context;
use super::deadlock::DeadlockReport;
use super::scheduler::global_queue::GlobalQueue;
use super::scheduler::local_queue::Stealer;
use super::scheduler::parker::Parker;
use super::task::Task;
use crate::config::RuntimeConfig;
use crate::error::JoinError;
use crate::time::TimerDriver;
use crate::tracing_compat::{debug, error};
use crate::types::TaskId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Task counters. `active` counts tasks that are queued or running; `epoch`
/// moves on every enqueue. Deadlock detection reads all three.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) live: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) epoch: AtomicU64,
    pub(crate) external: AtomicUsize,
    pub(crate) spawned: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) preemptions: AtomicU64,
}

impl Counters {
    /// Counts a wake before the task becomes visible in a queue.
    pub(crate) fn begin_schedule(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Undoes `begin_schedule` after a lost race.
    pub(crate) fn cancel_schedule(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    global: GlobalQueue,
    stealers: Vec<Stealer>,
    parkers: Vec<Parker>,
    sleepers: Mutex<Vec<usize>>,
    tasks: Mutex<HashMap<TaskId, Arc<Task>>>,
    pub(crate) counters: Counters,
    shutdown: AtomicBool,
    deadlock: Mutex<Option<DeadlockReport>>,
    timer: TimerDriver,
}

impl Shared {
    pub(crate) fn new(config: RuntimeConfig, stealers: Vec<Stealer>, timer: TimerDriver) -> Self {
        let parkers = (0..stealers.len()).map(|_| Parker::new()).collect();
        Self {
            config,
            global: GlobalQueue::new(),
            stealers,
            parkers,
            sleepers: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
            deadlock: Mutex::new(None),
            timer,
        }
    }

    pub(crate) fn global(&self) -> &GlobalQueue {
        &self.global
    }

    pub(crate) fn stealers(&self) -> &[Stealer] {
        &self.stealers
    }

    pub(crate) fn parker(&self, index: usize) -> &Parker {
        &self.parkers[index]
    }

    pub(crate) fn timer(&self) -> &TimerDriver {
        &self.timer
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Registers a freshly built task and makes it runnable.
    pub(crate) fn spawn(&self, task: Arc<Task>) {
        if self.is_shutdown() {
            task.abort(JoinError::Shutdown);
            return;
        }
        let id = task.id();
        self.tasks.lock().insert(id, Arc::clone(&task));
        self.counters.live.fetch_add(1, Ordering::AcqRel);
        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        self.counters.begin_schedule();
        debug!(task_id = ?id, "task spawned");
        self.push_local_or_global(task);
    }

    /// Enqueues a task that moved from blocked to runnable.
    pub(crate) fn push_woken(&self, task: Arc<Task>) {
        self.push_local_or_global(task);
    }

    /// Sends a task that woke itself during its poll to the back of the
    /// global queue.
    pub(crate) fn requeue(&self, task: Arc<Task>) {
        self.counters.epoch.fetch_add(1, Ordering::AcqRel);
        self.global.push(task);
        self.notify_one();
    }

    fn push_local_or_global(&self, task: Arc<Task>) {
        if let Some(task) = context::try_push_local(self, task) {
            self.global.push(task);
        }
        self.notify_one();
    }

    /// Bookkeeping after a poll returned `Blocked`.
    pub(crate) fn task_blocked(&self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Bookkeeping after a task completed or panicked.
    pub(crate) fn task_finished(&self, id: TaskId, panicked: bool) {
        self.tasks.lock().remove(&id);
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        if panicked {
            self.counters.panicked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn register_sleeper(&self, index: usize) {
        self.sleepers.lock().push(index);
    }

    pub(crate) fn remove_sleeper(&self, index: usize) {
        self.sleepers.lock().retain(|&i| i != index);
    }

    fn notify_one(&self) {
        let sleeper = self.sleepers.lock().pop();
        if let Some(index) = sleeper {
            self.parkers[index].unpark();
        }
    }

    pub(crate) fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for parker in &self.parkers {
            parker.unpark();
        }
    }

    /// Aborts every live task. Returns how many were still unfinished.
    pub(crate) fn abort_all(&self, err: &JoinError) -> usize {
        let orphans: Vec<Arc<Task>> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        let mut aborted = 0;
        for task in orphans {
            if task.abort(err.clone()) {
                aborted += 1;
            }
        }
        self.counters.live.store(0, Ordering::Release);
        aborted
    }

    pub(crate) fn live_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Records a deadlock, stops the workers and fails every live task.
    pub(crate) fn declare_deadlock(&self, report: DeadlockReport) {
        {
            let mut slot = self.deadlock.lock();
            if slot.is_some() {
                return;
            }
            error!(
                live_tasks = report.live_tasks(),
                blocked = ?report.blocked(),
                "deadlock detected: every live task is blocked"
            );
            *slot = Some(report);
        }
        self.begin_shutdown();
        self.abort_all(&JoinError::Deadlock);
    }

    pub(crate) fn deadlock_report(&self) -> Option<DeadlockReport> {
        self.deadlock.lock().clone()
    }
}
