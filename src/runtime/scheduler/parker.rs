//! Idle worker parking.
//!
//! Permit semantics: an `unpark` that arrives before `park` is remembered,
//! so the next `park` returns immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct Parker {
    notified: AtomicBool,
    mutex: Mutex<()>,
    cvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn take_permit(&self) -> bool {
        self.notified
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Parks until unparked or `timeout` elapses.
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        if self.take_permit() {
            return;
        }
        let mut guard = self.mutex.lock();
        if self.take_permit() {
            return;
        }
        let _ = self.cvar.wait_for(&mut guard, timeout);
        drop(guard);
        self.take_permit();
    }

    pub(crate) fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        let _guard = self.mutex.lock();
        self.cvar.notify_one();
    }
}
