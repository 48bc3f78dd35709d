//! Deadline wrapper for arbitrary futures.

use super::sleep::Sleep;
use crate::error::Elapsed;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Future returned by [`timeout`].
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Timeout<F> {
    #[pin]
    future: F,
    sleep: Sleep,
    limit: Duration,
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(out) = this.future.poll(cx) {
            return Poll::Ready(Ok(out));
        }
        match Pin::new(this.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed(*this.limit))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Runs `future` for at most `limit`.
///
/// The inner future is polled first, so a future that is ready at the same
/// moment the limit passes still wins.
pub fn timeout<F: Future>(limit: Duration, future: F) -> Timeout<F> {
    Timeout {
        future,
        sleep: Sleep::new(Instant::now() + limit),
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sleep;

    #[test]
    fn inner_wins_when_fast() {
        let out = futures_lite::future::block_on(timeout(Duration::from_secs(5), async { 7 }));
        assert_eq!(out, Ok(7));
    }

    #[test]
    fn elapses_when_slow() {
        crate::test_utils::init_test_logging();
        let out = futures_lite::future::block_on(timeout(
            Duration::from_millis(10),
            sleep(Duration::from_secs(5)),
        ));
        assert_eq!(out, Err(Elapsed(Duration::from_millis(10))));
    }
}
