//! Worker thread logic.
//!
//! Each worker repeats: pop local, else pop global, else steal from a random
//! peer, else park. Every [`GLOBAL_CHECK_INTERVAL`] ticks the global queue is
//! checked first so self-requeued tasks cannot starve behind a busy local
//! queue.

use super::local_queue::LocalQueue;
use super::stealing;
use crate::runtime::context;
use crate::runtime::shared::Shared;
use crate::runtime::task::{PollOutcome, Task};
use crate::tracing_compat::{debug, trace, warn};
use crate::util::DetRng;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Identifier for a scheduler worker.
pub(crate) type WorkerId = usize;

const GLOBAL_CHECK_INTERVAL: u32 = 61;
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

/// The parts of a worker reachable from its thread-local context.
pub(crate) struct WorkerCore {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: WorkerId,
    pub(crate) local: LocalQueue,
}

impl WorkerCore {
    fn find_task(&self, rng: &mut DetRng, tick: u32) -> Option<Arc<Task>> {
        if tick % GLOBAL_CHECK_INTERVAL == 0 {
            if let Some(task) = self.shared.global().pop() {
                return Some(task);
            }
        }
        if let Some(task) = self.local.pop() {
            return Some(task);
        }
        if let Some(task) = self.shared.global().pop() {
            return Some(task);
        }
        let stolen = stealing::steal_task(self.shared.stealers(), self.id, &self.local, rng);
        if stolen.is_some() {
            self.shared.counters.steals.fetch_add(1, Ordering::Relaxed);
            trace!(worker_id = self.id, "stole work");
        }
        stolen
    }

    fn run_task(&self, task: &Arc<Task>) {
        let task_id = task.id();
        let slice = self.shared.config.time_slice;
        trace!(task_id = ?task_id, worker_id = self.id, "executing task");
        let started = Instant::now();
        let outcome = task.poll(slice);
        let ran = started.elapsed();
        if ran > slice.saturating_mul(4) {
            debug!(
                task_id = ?task_id,
                worker_id = self.id,
                ran_ms = ran.as_millis() as u64,
                "task overran its time slice without yielding"
            );
        }
        match outcome {
            PollOutcome::Complete => {
                trace!(task_id = ?task_id, "task completed");
                self.shared.task_finished(task_id, false);
            }
            PollOutcome::Panicked(message) => {
                warn!(task_id = ?task_id, panic = %message, "task panicked");
                self.shared.task_finished(task_id, true);
            }
            PollOutcome::Blocked => self.shared.task_blocked(),
            PollOutcome::Requeue => self.shared.requeue(Arc::clone(task)),
            PollOutcome::Stale => {}
        }
    }
}

/// Worker thread body.
pub(crate) fn run(shared: Arc<Shared>, id: WorkerId, local: LocalQueue) {
    let core = Rc::new(WorkerCore {
        shared: Arc::clone(&shared),
        id,
        local,
    });
    let _guard = context::enter_worker(Rc::clone(&core));
    let mut rng = DetRng::from_entropy();
    let mut tick: u32 = 0;
    debug!(worker_id = id, "worker started");

    while !shared.is_shutdown() {
        tick = tick.wrapping_add(1);
        if let Some(task) = core.find_task(&mut rng, tick) {
            core.run_task(&task);
            continue;
        }

        shared.register_sleeper(id);
        if shared.is_shutdown() {
            break;
        }
        if let Some(task) = core.find_task(&mut rng, tick) {
            shared.remove_sleeper(id);
            core.run_task(&task);
            continue;
        }
        trace!(worker_id = id, "worker parking");
        shared.parker(id).park_timeout(PARK_TIMEOUT);
        shared.remove_sleeper(id);
    }

    debug!(worker_id = id, "worker stopped");
}
