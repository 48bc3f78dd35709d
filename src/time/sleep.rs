//! Sleep futures.

use super::driver::{self, TimerDriver, TimerHandle};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Completes once its deadline has passed.
///
/// The timer is registered on first poll with the driver of the runtime doing
/// the polling, and cancelled if the future is dropped early.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    deadline: Instant,
    timer: Option<(TimerDriver, TimerHandle)>,
}

impl Sleep {
    pub(crate) const fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            timer: None,
        }
    }

    /// The instant this sleep completes at.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Moves the deadline, re-arming on the next poll.
    pub fn reset(&mut self, deadline: Instant) {
        self.cancel_timer();
        self.deadline = deadline;
    }

    fn cancel_timer(&mut self) {
        if let Some((driver, handle)) = self.timer.take() {
            driver.cancel(&handle);
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            self.cancel_timer();
            return Poll::Ready(());
        }
        let armed = matches!(
            &self.timer,
            Some((driver, handle)) if driver.update_waker(handle, cx.waker())
        );
        if !armed {
            let driver = driver::current();
            let handle = driver.register(self.deadline, cx.waker().clone());
            self.timer = Some((driver, handle));
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// Sleeps for `duration`.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(Instant::now() + duration)
}

/// Sleeps until `deadline`. A deadline in the past completes on first poll.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep::new(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_deadline_ready_immediately() {
        let mut fut = sleep_until(Instant::now() - Duration::from_millis(1));
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
        assert!(fut.is_elapsed());
    }

    #[test]
    fn pending_then_ready_on_fallback_driver() {
        crate::test_utils::init_test_logging();
        let fut = sleep(Duration::from_millis(15));
        let start = Instant::now();
        futures_lite::future::block_on(fut);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn drop_cancels_registration() {
        let mut fut = sleep(Duration::from_secs(60));
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        let (driver, handle) = fut.timer.clone().expect("registered");
        drop(fut);
        assert!(!driver.cancel(&handle));
    }
}
