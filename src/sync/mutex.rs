//! Task-aware mutual exclusion.
//!
//! Waiting for the lock suspends the task instead of the worker thread.
//! Contended acquisitions are served strictly in arrival order: releasing
//! the lock hands it directly to the oldest waiter, so a task that keeps
//! re-locking in a loop cannot starve the others.
//!
//! # Unlock policy
//!
//! Every guard records the task that acquired it. [`MutexGuard::unlock`]
//! called from a different task returns [`UnlockError::NotHeld`] and logs at
//! `error`; the lock is released anyway so the misuse cannot wedge other
//! tasks. Dropping a guard always releases without a check.

#![allow(unsafe_code)]

use crate::runtime::coop;
use crate::tracing_compat::{error, trace};
use crate::types::TaskId;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// Error returned by [`Mutex::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryLockError {
    /// The lock is held, or other tasks are already queued for it.
    #[error("mutex is locked")]
    WouldBlock,
}

/// Error returned by an explicit unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnlockError {
    /// The caller is not the task that acquired the guard.
    #[error("unlock by {caller:?}, but the mutex is held by {holder:?}")]
    NotHeld {
        /// Task that acquired the lock (`None` outside any task).
        holder: Option<TaskId>,
        /// Task that attempted the unlock.
        caller: Option<TaskId>,
    },
}

struct Waiter {
    id: u64,
    waker: Waker,
}

struct LockState {
    locked: bool,
    holder: Option<TaskId>,
    waiters: VecDeque<Waiter>,
    // Waiter the lock was handed to but that has not observed it yet.
    granted: Option<u64>,
    next_waiter: u64,
}

impl LockState {
    /// Passes the lock to the next waiter, or unlocks.
    fn release(&mut self) -> Option<Waker> {
        self.holder = None;
        match self.waiters.pop_front() {
            Some(next) => {
                self.granted = Some(next.id);
                Some(next.waker)
            }
            None => {
                self.locked = false;
                None
            }
        }
    }
}

/// An async mutex protecting a `T`.
///
/// Share it through an `Arc` (or a borrow); it is deliberately not `Clone`.
pub struct Mutex<T: ?Sized> {
    state: parking_lot::Mutex<LockState>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the `locked` flag; only the
// single live guard dereferences it.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            state: parking_lot::Mutex::new(LockState {
                locked: false,
                holder: None,
                waiters: VecDeque::new(),
                granted: None,
                next_waiter: 0,
            }),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, waiting behind earlier callers.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
        }
    }

    /// Acquires the lock through an `Arc`, yielding a guard that owns it.
    pub fn lock_owned(self: Arc<Self>) -> LockOwned<T> {
        LockOwned {
            mutex: Some(self),
            waiter: None,
        }
    }

    /// Acquires the lock only if it is free and nobody is queued.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        let owner = self.try_acquire()?;
        Ok(MutexGuard { mutex: self, owner })
    }

    /// True while any guard is alive (or the lock is being handed over).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Task currently holding the lock.
    #[must_use]
    pub fn holder(&self) -> Option<TaskId> {
        self.state.lock().holder
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn try_acquire(&self) -> Result<Option<TaskId>, TryLockError> {
        let mut state = self.state.lock();
        if state.locked {
            return Err(TryLockError::WouldBlock);
        }
        let owner = TaskId::current();
        state.locked = true;
        state.holder = owner;
        Ok(owner)
    }

    fn poll_acquire(&self, waiter: &mut Option<u64>, cx: &Context<'_>) -> Poll<Option<TaskId>> {
        let mut state = self.state.lock();
        match *waiter {
            Some(id) if state.granted == Some(id) => {
                let owner = TaskId::current();
                state.granted = None;
                state.holder = owner;
                *waiter = None;
                Poll::Ready(owner)
            }
            Some(id) => {
                if let Some(entry) = state.waiters.iter_mut().find(|w| w.id == id) {
                    if !entry.waker.will_wake(cx.waker()) {
                        entry.waker = cx.waker().clone();
                    }
                }
                Poll::Pending
            }
            // Unlocked implies nobody is queued: release hands off otherwise.
            None if !state.locked => {
                let owner = TaskId::current();
                state.locked = true;
                state.holder = owner;
                Poll::Ready(owner)
            }
            None => {
                state.next_waiter += 1;
                let id = state.next_waiter;
                state.waiters.push_back(Waiter {
                    id,
                    waker: cx.waker().clone(),
                });
                *waiter = Some(id);
                trace!(
                    holder = ?state.holder,
                    queued = state.waiters.len(),
                    "mutex contended"
                );
                Poll::Pending
            }
        }
    }

    /// Withdraws a pending acquisition, passing on a lock it was granted.
    fn cancel_acquire(&self, waiter: &mut Option<u64>) {
        let Some(id) = waiter.take() else {
            return;
        };
        let wake = {
            let mut state = self.state.lock();
            if state.granted == Some(id) {
                state.granted = None;
                state.release()
            } else {
                state.waiters.retain(|w| w.id != id);
                None
            }
        };
        if let Some(waker) = wake {
            waker.wake();
        }
    }

    fn release(&self) {
        let wake = self.state.lock().release();
        if let Some(waker) = wake {
            waker.wake();
        }
    }

    fn checked_release(&self, owner: Option<TaskId>) -> Result<(), UnlockError> {
        let caller = TaskId::current();
        self.release();
        if caller == owner {
            Ok(())
        } else {
            error!(holder = ?owner, caller = ?caller, "mutex unlocked by a task that does not hold it");
            Err(UnlockError::NotHeld {
                holder: owner,
                caller,
            })
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("locked", &state.locked)
            .field("holder", &state.holder)
            .field("waiters", &state.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless polled"]
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    waiter: Option<u64>,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let mutex = self.mutex;
        mutex
            .poll_acquire(&mut self.waiter, cx)
            .map(|owner| MutexGuard { mutex, owner })
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        self.mutex.cancel_acquire(&mut self.waiter);
    }
}

/// Future returned by [`Mutex::lock_owned`].
#[must_use = "futures do nothing unless polled"]
pub struct LockOwned<T: ?Sized> {
    mutex: Option<Arc<Mutex<T>>>,
    waiter: Option<u64>,
}

impl<T: ?Sized> Unpin for LockOwned<T> {}

impl<T: ?Sized> Future for LockOwned<T> {
    type Output = OwnedMutexGuard<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let this = &mut *self;
        let Some(mutex) = this.mutex.as_ref() else {
            panic!("LockOwned polled after completion");
        };
        let owner = std::task::ready!(mutex.poll_acquire(&mut this.waiter, cx));
        match this.mutex.take() {
            Some(mutex) => Poll::Ready(OwnedMutexGuard { mutex, owner }),
            None => unreachable!("mutex checked above"),
        }
    }
}

impl<T: ?Sized> Drop for LockOwned<T> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.as_ref() {
            mutex.cancel_acquire(&mut self.waiter);
        }
    }
}

/// Scoped lock. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    owner: Option<TaskId>,
}

// SAFETY: sharing the guard only hands out `&T`.
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Releases the lock, checking that the caller acquired it.
    pub fn unlock(self) -> Result<(), UnlockError> {
        let guard = std::mem::ManuallyDrop::new(self);
        guard.mutex.checked_release(guard.owner)
    }

    /// Task that acquired this guard.
    #[must_use]
    pub const fn owner(&self) -> Option<TaskId> {
        self.owner
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard is the only live accessor while it exists.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`, and `&mut self` excludes other borrows.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Lock guard that keeps its mutex alive through an `Arc`.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OwnedMutexGuard<T: ?Sized> {
    mutex: Arc<Mutex<T>>,
    owner: Option<TaskId>,
}

// SAFETY: sharing the guard only hands out `&T`.
unsafe impl<T: ?Sized + Sync> Sync for OwnedMutexGuard<T> {}

impl<T: ?Sized> OwnedMutexGuard<T> {
    /// Releases the lock, checking that the caller acquired it.
    pub fn unlock(self) -> Result<(), UnlockError> {
        let owner = self.owner;
        let mutex = Arc::clone(&self.mutex);
        std::mem::forget(self);
        mutex.checked_release(owner)
    }

    /// Task that acquired this guard.
    #[must_use]
    pub const fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// The mutex this guard locks.
    #[must_use]
    pub fn mutex(&self) -> &Arc<Mutex<T>> {
        &self.mutex
    }
}

impl<T: ?Sized> Deref for OwnedMutexGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard is the only live accessor while it exists.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for OwnedMutexGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`, and `&mut self` excludes other borrows.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for OwnedMutexGuard<T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for OwnedMutexGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, test_runtime};

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn try_lock_excludes() {
        init_test_logging();
        crate::test_phase!("try_lock_excludes");
        let mutex = Mutex::new(1);
        let guard = mutex.try_lock().expect("free");
        assert!(mutex.is_locked());
        assert_eq!(mutex.try_lock().unwrap_err(), TryLockError::WouldBlock);
        drop(guard);
        assert!(!mutex.is_locked());
        crate::test_complete!("try_lock_excludes");
    }

    #[test]
    fn release_hands_off_in_arrival_order() {
        let mutex = Mutex::new(Vec::new());
        let guard = mutex.try_lock().expect("free");
        let mut first = Box::pin(mutex.lock());
        let mut second = Box::pin(mutex.lock());
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());

        drop(guard);
        // Handed over, so a newcomer cannot barge in.
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_err());
        assert!(poll_once(&mut second).is_pending());

        let Poll::Ready(mut g1) = poll_once(&mut first) else {
            panic!("first waiter should own the lock");
        };
        g1.push(1);
        drop(g1);
        let Poll::Ready(mut g2) = poll_once(&mut second) else {
            panic!("second waiter should own the lock");
        };
        g2.push(2);
        drop(g2);
        drop(first);
        drop(second);
        assert_eq!(mutex.into_inner(), vec![1, 2]);
    }

    #[test]
    fn dropped_waiter_passes_grant_on() {
        let mutex = Mutex::new(0);
        let guard = mutex.try_lock().expect("free");
        let mut first = Box::pin(mutex.lock());
        let mut second = Box::pin(mutex.lock());
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        drop(guard);
        drop(first);
        assert!(poll_once(&mut second).is_ready());
    }

    #[test]
    fn unlock_by_acquirer_is_ok() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().expect("free");
        assert_eq!(guard.owner(), None);
        assert_eq!(guard.unlock(), Ok(()));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn unlock_from_other_task_fails_but_releases() {
        init_test_logging();
        let rt = test_runtime(2);
        let handle = rt.handle();
        let mutex = Arc::new(Mutex::new(0_u32));
        let m = Arc::clone(&mutex);
        let result = rt
            .block_on(async move {
                let guard = Arc::clone(&m).lock_owned().await;
                let acquirer = TaskId::current();
                assert_eq!(guard.owner(), acquirer);
                handle
                    .spawn(async move { guard.unlock() })
                    .await
                    .expect("unlocker")
            })
            .expect("root");
        let Err(UnlockError::NotHeld { holder, caller }) = result else {
            panic!("unlock from another task must fail");
        };
        assert_ne!(holder, caller);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn contended_increments_are_exact() {
        let rt = test_runtime(4);
        let handle = rt.handle();
        let mutex = Arc::new(Mutex::new(0_u64));
        let m = Arc::clone(&mutex);
        rt.block_on(async move {
            let mut joins = Vec::new();
            for _ in 0..8 {
                let m = Arc::clone(&m);
                joins.push(handle.spawn(async move {
                    for _ in 0..200 {
                        let mut guard = m.lock().await;
                        *guard += 1;
                    }
                }));
            }
            for join in joins {
                join.await.expect("incrementer");
            }
        })
        .expect("root");
        assert_eq!(*mutex.try_lock().expect("free"), 1600);
        assert_eq!(mutex.holder(), None);
    }
}
