//! Cooperative time slicing.
//!
//! Blocking primitives call [`poll_proceed`] before doing any work. Once the
//! task has been running for longer than the configured time slice the call
//! wakes the task and returns `Pending`, sending it to the back of the global
//! queue. A task that never touches a primitive is only preempted at its own
//! `.await` points (see [`yield_now`](super::yield_now)).

use super::context;
use crate::tracing_compat::trace;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

pub(crate) fn poll_proceed(cx: &mut Context<'_>) -> Poll<()> {
    if context::slice_exhausted() {
        trace!(task = ?context::current_task(), "time slice exhausted, yielding");
        context::with_current_shared(|shared| {
            shared.counters.preemptions.fetch_add(1, Ordering::Relaxed);
        });
        cx.waker().wake_by_ref();
        return Poll::Pending;
    }
    Poll::Ready(())
}
