//! Timer driver.
//!
//! A min-heap of `(deadline, id)` entries plus a map from id to waker. The
//! driver thread sleeps on a condvar until the earliest deadline (never
//! sooner than one resolution step from now, so bursts of timers coalesce),
//! then wakes every expired entry outside the lock.
//!
//! Cancellation is lazy: cancelling removes the waker and leaves the heap
//! entry behind to be discarded when it surfaces.

use crate::tracing_compat::{debug, error, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::task::Waker;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    id: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    wakers: HashMap<u64, Waker>,
    next_id: u64,
    shutdown: bool,
}

impl TimerState {
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if self.wakers.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    fn collect_expired(&mut self, now: Instant) -> Vec<Waker> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let id = entry.id;
            self.heap.pop();
            if let Some(waker) = self.wakers.remove(&id) {
                expired.push(waker);
            }
        }
        expired
    }
}

struct Inner {
    state: Mutex<TimerState>,
    cond: Condvar,
    resolution: Duration,
}

/// Identifies one registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    id: u64,
    deadline: Instant,
}

impl TimerHandle {
    /// The deadline this timer fires at.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Periodic callback run on the driver thread between timer batches.
pub(crate) struct DriverHook {
    pub(crate) interval: Duration,
    pub(crate) tick: Box<dyn FnMut() + Send>,
}

/// Shared handle to a timer heap and its driver thread.
#[derive(Clone)]
pub struct TimerDriver {
    inner: Arc<Inner>,
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("resolution", &self.inner.resolution)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl TimerDriver {
    /// Creates a driver with the given coalescing resolution. No thread is
    /// started; see [`TimerDriver::run`].
    #[must_use]
    pub fn new(resolution: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TimerState::default()),
                cond: Condvar::new(),
                resolution,
            }),
        }
    }

    /// Registers `waker` to be woken once `deadline` has passed.
    pub fn register(&self, deadline: Instant, waker: Waker) -> TimerHandle {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let earliest = state.next_deadline().is_none_or(|d| deadline < d);
        state.heap.push(TimerEntry { deadline, id });
        state.wakers.insert(id, waker);
        drop(state);
        if earliest {
            self.inner.cond.notify_one();
        }
        TimerHandle { id, deadline }
    }

    /// Replaces the waker of a still-pending timer.
    ///
    /// Returns false if the timer already fired or was cancelled.
    pub fn update_waker(&self, handle: &TimerHandle, waker: &Waker) -> bool {
        let mut state = self.inner.state.lock();
        match state.wakers.get_mut(&handle.id) {
            Some(slot) => {
                if !slot.will_wake(waker) {
                    slot.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    /// Cancels a timer. Returns true if it was still pending.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        self.inner.state.lock().wakers.remove(&handle.id).is_some()
    }

    /// Number of timers that have neither fired nor been cancelled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().wakers.len()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.state.lock().next_deadline()
    }

    /// Fires every timer due at `now`. Returns the number fired.
    pub fn process_timers(&self, now: Instant) -> usize {
        let expired = self.inner.state.lock().collect_expired(now);
        let fired = expired.len();
        for waker in expired {
            waker.wake();
        }
        fired
    }

    /// Stops the `run` loop. Pending timers are dropped without firing.
    pub(crate) fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.wakers.clear();
        state.heap.clear();
        drop(state);
        self.inner.cond.notify_all();
    }

    /// Driver thread body. Returns after [`TimerDriver::shutdown`].
    pub(crate) fn run(&self, mut hook: Option<DriverHook>) {
        debug!(resolution = ?self.inner.resolution, "timer driver started");
        let mut next_tick = hook.as_ref().map(|h| Instant::now() + h.interval);
        let mut state = self.inner.state.lock();
        loop {
            if state.shutdown {
                break;
            }
            let now = Instant::now();
            let expired = state.collect_expired(now);
            if !expired.is_empty() {
                trace!(fired = expired.len(), "timers fired");
                MutexGuard::unlocked(&mut state, || {
                    for waker in expired {
                        waker.wake();
                    }
                });
                continue;
            }
            if let (Some(h), Some(at)) = (hook.as_mut(), next_tick) {
                if now >= at {
                    MutexGuard::unlocked(&mut state, || (h.tick)());
                    next_tick = Some(Instant::now() + h.interval);
                    continue;
                }
            }
            let timer_at = state
                .next_deadline()
                .map(|d| d.max(now + self.inner.resolution));
            let wake_at = match (timer_at, next_tick) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake_at {
                Some(at) => {
                    let _ = self.inner.cond.wait_until(&mut state, at);
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
        debug!("timer driver stopped");
    }
}

static FALLBACK: OnceLock<TimerDriver> = OnceLock::new();

/// Driver used by timers created outside any runtime. Started on first use.
pub(crate) fn fallback() -> &'static TimerDriver {
    FALLBACK.get_or_init(|| {
        let driver = TimerDriver::new(crate::config::DEFAULT_DEADLINE_RESOLUTION);
        let thread_driver = driver.clone();
        if let Err(err) = std::thread::Builder::new()
            .name("strand-timer".to_string())
            .spawn(move || thread_driver.run(None))
        {
            error!(error = %err, "failed to start standalone timer thread");
        }
        driver
    })
}

/// Timers pending on the standalone driver. Zero if it was never started.
pub(crate) fn fallback_pending() -> usize {
    FALLBACK.get().map_or(0, TimerDriver::pending_count)
}

/// The driver of the current runtime, or the standalone fallback.
pub(crate) fn current() -> TimerDriver {
    crate::runtime::Handle::try_current()
        .map_or_else(|| fallback().clone(), |handle| handle.timer().clone())
}
