//! Explicit cooperative yield.
//!
//! The future wakes its own task while that task is being polled, so the
//! worker sees the task as notified once the poll returns and sends it to
//! the back of the global queue: every task already runnable gets a turn
//! first. This is the same path an exhausted time slice takes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    requeued: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if std::mem::replace(&mut self.requeued, true) {
            return Poll::Ready(());
        }
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Lets every other runnable task run before the caller continues.
pub fn yield_now() -> YieldNow {
    YieldNow { requeued: false }
}
