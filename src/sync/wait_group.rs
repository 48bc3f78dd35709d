//! Counting barrier.
//!
//! A [`WaitGroup`] counts outstanding work. [`WaitGroup::wait`] completes
//! once the count is back at zero. Every transition to zero closes a batch
//! and releases exactly the waiters registered during it.
//!
//! Misuse is reported, never absorbed:
//!
//! - Taking the count below zero fails with
//!   [`WaitGroupError::NegativeCounter`] and leaves the count unchanged.
//! - Starting a new batch (adding from zero) while waiters released by the
//!   previous batch have not yet returned fails with
//!   [`WaitGroupError::ReusedBeforeWaitReturned`].

use crate::runtime::coop;
use crate::tracing_compat::{error, trace};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// WaitGroup misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitGroupError {
    /// `add` would take the counter below zero.
    #[error("wait group counter would go negative: {count} + ({delta})")]
    NegativeCounter {
        /// Count before the rejected call.
        count: i64,
        /// The rejected delta.
        delta: i64,
    },
    /// A new batch was started while waiters of the last one were still
    /// returning.
    #[error("wait group reused before previous wait returned")]
    ReusedBeforeWaitReturned,
}

struct Waiter {
    id: u64,
    waker: Waker,
}

struct State {
    count: i64,
    generation: u64,
    waiters: Vec<Waiter>,
    // Released by a finished batch but not yet observed.
    releasing: usize,
    next_waiter: u64,
}

/// A cloneable handle to a shared counter.
#[derive(Clone)]
pub struct WaitGroup {
    state: Arc<Mutex<State>>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    /// A wait group with a count of zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                count: 0,
                generation: 0,
                waiters: Vec::new(),
                releasing: 0,
                next_waiter: 0,
            })),
        }
    }

    /// Adjusts the counter by `delta`, releasing waiters when it reaches
    /// zero.
    pub fn add(&self, delta: i64) -> Result<(), WaitGroupError> {
        let released = {
            let mut state = self.state.lock();
            let count = state.count;
            let next = count.checked_add(delta).unwrap_or(i64::MIN);
            if next < 0 {
                error!(count, delta, "wait group counter would go negative");
                return Err(WaitGroupError::NegativeCounter { count, delta });
            }
            if count == 0 && delta > 0 && state.releasing > 0 {
                error!(
                    releasing = state.releasing,
                    "wait group reused before previous wait returned"
                );
                return Err(WaitGroupError::ReusedBeforeWaitReturned);
            }
            state.count = next;
            if next == 0 && count > 0 {
                state.generation += 1;
                let waiters = std::mem::take(&mut state.waiters);
                state.releasing += waiters.len();
                trace!(
                    generation = state.generation,
                    released = waiters.len(),
                    "wait group reached zero"
                );
                waiters
            } else {
                Vec::new()
            }
        };
        for waiter in released {
            waiter.waker.wake();
        }
        Ok(())
    }

    /// `add(-1)`.
    pub fn done(&self) -> Result<(), WaitGroupError> {
        self.add(-1)
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.state.lock().count
    }

    /// Waits until the count is zero. Completes immediately if it already
    /// is.
    pub fn wait(&self) -> Wait {
        Wait {
            group: self.clone(),
            registration: None,
        }
    }

    /// Adds one and returns a guard that calls `done` when dropped, on every
    /// exit path including unwinding.
    pub fn guard(&self) -> Result<WaitGroupGuard, WaitGroupError> {
        self.add(1)?;
        Ok(WaitGroupGuard {
            group: self.clone(),
        })
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WaitGroup")
            .field("count", &state.count)
            .field("waiters", &state.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`WaitGroup::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    group: WaitGroup,
    // (waiter id, generation it waits for the end of)
    registration: Option<(u64, u64)>,
}

impl Future for Wait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let this = &mut *self;
        let mut state = this.group.state.lock();
        match this.registration {
            None if state.count == 0 => Poll::Ready(()),
            None => {
                state.next_waiter += 1;
                let id = state.next_waiter;
                state.waiters.push(Waiter {
                    id,
                    waker: cx.waker().clone(),
                });
                this.registration = Some((id, state.generation));
                Poll::Pending
            }
            Some((_, generation)) if generation != state.generation => {
                state.releasing -= 1;
                this.registration = None;
                Poll::Ready(())
            }
            Some((id, _)) => {
                if let Some(waiter) = state.waiters.iter_mut().find(|w| w.id == id) {
                    if !waiter.waker.will_wake(cx.waker()) {
                        waiter.waker = cx.waker().clone();
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        let Some((id, generation)) = self.registration.take() else {
            return;
        };
        let mut state = self.group.state.lock();
        if generation == state.generation {
            state.waiters.retain(|w| w.id != id);
        } else {
            state.releasing -= 1;
        }
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("registered", &self.registration.is_some())
            .finish_non_exhaustive()
    }
}

/// Calls [`WaitGroup::done`] when dropped.
#[must_use = "dropping the guard marks the work done immediately"]
#[derive(Debug)]
pub struct WaitGroupGuard {
    group: WaitGroup,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        // The guard's own add(1) is still outstanding, so this cannot
        // underflow unless someone else called done() for it.
        let _ = self.group.done();
    }
}
