//! Waiter claim protocol shared by plain channel operations and `select`.
//!
//! Every blocked operation (or `select` with several arms) owns one
//! [`Token`]. Its state is a small atomic:
//!
//! - `WAITING`: parked, any registered arm may be completed by a counterpart.
//! - `BUSY` / `BUSY_RETRY`: the owner is being polled and is scanning its arms
//!   itself. A counterpart that finds it busy skips it and flags a retry so
//!   the owner rescans before parking.
//! - `DONE + i`: arm `i` has been completed. Exactly one arm ever wins,
//!   because the transition away from `WAITING`/`BUSY` happens once.
//! - `ABANDONED`: the owner gave up (dropped, or its timeout won).
//!
//! Counterparts only move `WAITING -> DONE`, and always while holding the
//! lock of the channel the arm is registered on.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

const WAITING: usize = 0;
const BUSY: usize = 1;
const BUSY_RETRY: usize = 2;
const DONE: usize = 3;
const ABANDONED: usize = usize::MAX;

/// Rescans before a contended owner yields instead of spinning further.
const MAX_PASSES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The counterpart now owns the completion of this arm.
    Claimed,
    /// The owner is mid-poll; skip it.
    Busy,
    /// The owner already finished or gave up; drop the waiter.
    Gone,
}

#[derive(Debug)]
pub(crate) struct Token {
    state: AtomicUsize,
    waker: Mutex<Option<Waker>>,
}

impl Token {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicUsize::new(WAITING),
            waker: Mutex::new(None),
        })
    }

    fn set_waker(&self, waker: &Waker) {
        let mut slot = self.waker.lock();
        match slot.as_ref() {
            Some(existing) if existing.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn wake(&self) {
        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Owner enters `BUSY`. Returns the winning arm if a counterpart already
    /// completed one.
    fn begin(&self) -> Option<usize> {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current >= DONE && current != ABANDONED {
                return Some(current - DONE);
            }
            if current == ABANDONED {
                return None;
            }
            if self
                .state
                .compare_exchange(current, BUSY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return None;
            }
        }
    }

    /// Owner leaves `BUSY` to park. False if a counterpart flagged a retry,
    /// in which case the owner is still `BUSY`.
    fn finish_idle(&self) -> bool {
        match self
            .state
            .compare_exchange(BUSY, WAITING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(_) => {
                self.state.store(BUSY, Ordering::Release);
                false
            }
        }
    }

    /// Owner completed arm `index` itself.
    fn complete(&self, index: usize) {
        self.state.store(DONE + index, Ordering::Release);
    }

    /// Counterpart attempts to complete arm `index` of this token.
    pub(crate) fn try_claim(&self, index: usize) -> Claim {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (next, result) = match current {
                WAITING => (DONE + index, Claim::Claimed),
                BUSY => (BUSY_RETRY, Claim::Busy),
                BUSY_RETRY => return Claim::Busy,
                _ => return Claim::Gone,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return result,
                Err(actual) => current = actual,
            }
        }
    }

    /// Owner gives up. Returns the winning arm if a counterpart got there
    /// first.
    fn abandon(&self) -> Option<usize> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= DONE && current != ABANDONED {
                return Some(current - DONE);
            }
            if current == ABANDONED {
                return None;
            }
            match self.state.compare_exchange(
                current,
                ABANDONED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return None,
                Err(actual) => current = actual,
            }
        }
    }
}

/// One channel operation as seen by the driver.
pub(crate) trait Arm {
    /// Completes the operation if it can proceed now. Otherwise registers a
    /// waiter under `token` when `register` is set (once; later calls keep
    /// the queue position). Called with `token` in `BUSY`.
    fn attempt(&mut self, token: &Arc<Token>, index: usize, register: bool) -> bool;

    /// A counterpart completed this arm while the owner was parked.
    fn claimed(&mut self);

    /// Withdraws any registered waiter.
    fn cancel(&mut self);

    /// The owner is going away after a counterpart completed this arm.
    /// Puts any value it received back where it came from.
    fn revert(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drive {
    Ready(usize),
    NoneReady,
    Pending,
}

fn settle(arms: &mut [&mut dyn Arm], winner: usize) {
    for (i, arm) in arms.iter_mut().enumerate() {
        if i != winner {
            arm.cancel();
        }
    }
}

/// Runs one poll of a (possibly single-arm) operation.
///
/// `order` is the scan order for this poll. With `block` unset nothing is
/// registered and `NoneReady` is returned when no arm can proceed.
pub(crate) fn drive(
    token: &Arc<Token>,
    arms: &mut [&mut dyn Arm],
    order: &[usize],
    block: bool,
    cx: &mut Context<'_>,
) -> Drive {
    token.set_waker(cx.waker());
    if let Some(winner) = token.begin() {
        arms[winner].claimed();
        settle(arms, winner);
        return Drive::Ready(winner);
    }

    for _ in 0..MAX_PASSES {
        for &i in order {
            if arms[i].attempt(token, i, block) {
                token.complete(i);
                settle(arms, i);
                return Drive::Ready(i);
            }
        }
        if !block {
            token.complete(arms.len());
            return Drive::NoneReady;
        }
        if token.finish_idle() {
            return Drive::Pending;
        }
    }

    // Persistent contention: park anyway and come straight back.
    if !token.finish_idle() {
        token.state.store(WAITING, Ordering::Release);
    }
    cx.waker().wake_by_ref();
    Drive::Pending
}

/// Resolves a parked operation whose owner is giving up. Returns the arm a
/// counterpart completed in the meantime, if any; that arm's output is
/// ready to take.
pub(crate) fn give_up(token: &Arc<Token>, arms: &mut [&mut dyn Arm]) -> Option<usize> {
    match token.abandon() {
        Some(winner) if winner < arms.len() => {
            arms[winner].claimed();
            settle(arms, winner);
            Some(winner)
        }
        _ => {
            for arm in arms.iter_mut() {
                arm.cancel();
            }
            None
        }
    }
}

/// Drop path for an unfinished operation: withdraws every waiter and
/// returns any value already handed to it.
pub(crate) fn abandon(token: &Arc<Token>, arms: &mut [&mut dyn Arm]) {
    if let Some(winner) = give_up(token, arms) {
        arms[winner].revert();
    }
}

/// Completes a blocking poll of a single-arm operation.
pub(crate) fn drive_one(
    token: &Arc<Token>,
    arm: &mut dyn Arm,
    cx: &mut Context<'_>,
) -> Poll<()> {
    match drive(token, &mut [arm], &[0], true, cx) {
        Drive::Ready(_) => Poll::Ready(()),
        Drive::NoneReady | Drive::Pending => Poll::Pending,
    }
}

/// Non-blocking single attempt. True if the arm completed.
pub(crate) fn try_once(arm: &mut dyn Arm) -> bool {
    let token = Token::new();
    let mut cx = Context::from_waker(Waker::noop());
    matches!(
        drive(&token, &mut [arm], &[0], false, &mut cx),
        Drive::Ready(_)
    )
}
