//! Typed FIFO channels.
//!
//! - [`rendezvous`]: capacity zero. A send completes only when a receiver
//!   takes the value.
//! - [`bounded`]: up to `capacity` values buffered; senders block when full.
//!
//! Both ends are cloneable. Values are delivered in send order, and blocked
//! senders (or receivers) are served in the order they blocked.
//!
//! # Closing
//!
//! [`Sender::close`] (or dropping the last sender) closes the channel.
//! Receivers drain whatever is buffered and then get `None`. Sends on a
//! closed channel, including sends that were blocked at the time, fail with
//! [`SendError`] carrying the value back. Dropping every receiver also makes
//! sends fail.
//!
//! # Cancellation
//!
//! Dropping a pending [`RecvOp`] never loses a value: if a sender had
//! already handed it one, the value goes back to the front of the channel.
//! Dropping a pending [`SendOp`] withdraws the value.

pub mod error;
pub(crate) mod shared;
pub(crate) mod waiter;

pub use error::{CloseError, SendError, TryRecvError, TrySendError};

use crate::runtime::coop;
use shared::{Chan, RecvArm, SendArm};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use waiter::Token;

/// Creates a channel buffering up to `capacity` values. Zero is rendezvous.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let chan = Chan::new(capacity);
    (
        Sender {
            chan: Arc::clone(&chan),
        },
        Receiver { chan },
    )
}

/// Creates an unbuffered channel.
#[must_use]
pub fn rendezvous<T>() -> (Sender<T>, Receiver<T>) {
    bounded(0)
}

/// Sending half.
pub struct Sender<T> {
    chan: Arc<Chan<T>>,
}

/// Receiving half.
pub struct Receiver<T> {
    chan: Arc<Chan<T>>,
}

impl<T> Sender<T> {
    /// Sends `value`, waiting for buffer space or a receiver.
    pub fn send(&self, value: T) -> SendOp<T> {
        SendOp {
            token: Token::new(),
            arm: Some(SendArm::new(Arc::clone(&self.chan), value)),
            finished: false,
        }
    }

    /// Sends without waiting.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut arm = SendArm::new(Arc::clone(&self.chan), value);
        if waiter::try_once(&mut arm) {
            return match arm.take() {
                Some(Err(SendError(value))) => Err(TrySendError::Closed(value)),
                _ => Ok(()),
            };
        }
        match arm.into_value() {
            Some(value) => Err(TrySendError::Full(value)),
            None => Ok(()),
        }
    }

    /// Closes the channel. Fails if it was already closed.
    pub fn close(&self) -> Result<(), CloseError> {
        if self.chan.close() {
            Ok(())
        } else {
            Err(CloseError::AlreadyClosed)
        }
    }

    /// True once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chan.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity. Zero for rendezvous channels.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    /// True if both senders feed the same channel.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chan, &other.chan)
    }

    pub(crate) fn chan(&self) -> &Arc<Chan<T>> {
        &self.chan
    }
}

impl<T> Receiver<T> {
    /// Receives the next value. `None` once the channel is closed and drained.
    pub fn recv(&self) -> RecvOp<T> {
        RecvOp {
            token: Token::new(),
            arm: RecvArm::new(Arc::clone(&self.chan)),
            finished: false,
        }
    }

    /// Receives without waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut arm = RecvArm::new(Arc::clone(&self.chan));
        if !waiter::try_once(&mut arm) {
            return Err(TryRecvError::Empty);
        }
        match arm.take() {
            Some(Some(value)) => Ok(value),
            _ => Err(TryRecvError::Closed),
        }
    }

    /// True once the channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chan.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity. Zero for rendezvous channels.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    pub(crate) fn chan(&self) -> &Arc<Chan<T>> {
        &self.chan
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.chan.add_sender();
        Self {
            chan: Arc::clone(&self.chan),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.chan.drop_sender() {
            self.chan.close();
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.chan.add_receiver();
        Self {
            chan: Arc::clone(&self.chan),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.chan.drop_receiver();
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Sender::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendOp<T> {
    token: Arc<Token>,
    arm: Option<SendArm<T>>,
    finished: bool,
}

impl<T> Unpin for SendOp<T> {}

impl<T> Future for SendOp<T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let this = &mut *self;
        let Some(arm) = this.arm.as_mut() else {
            panic!("SendOp polled after completion");
        };
        if waiter::drive_one(&this.token, arm, cx).is_pending() {
            return Poll::Pending;
        }
        this.finished = true;
        let out = arm.take().unwrap_or(Ok(()));
        this.arm = None;
        Poll::Ready(out)
    }
}

impl<T> Drop for SendOp<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(arm) = self.arm.as_mut() {
            abandon_arm(&self.token, arm);
        }
    }
}

/// Future returned by [`Receiver::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvOp<T> {
    token: Arc<Token>,
    arm: RecvArm<T>,
    finished: bool,
}

impl<T> Unpin for RecvOp<T> {}

impl<T> Future for RecvOp<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let this = &mut *self;
        if waiter::drive_one(&this.token, &mut this.arm, cx).is_pending() {
            return Poll::Pending;
        }
        this.finished = true;
        Poll::Ready(this.arm.take().flatten())
    }
}

impl<T> Drop for RecvOp<T> {
    fn drop(&mut self) {
        if !self.finished {
            abandon_arm(&self.token, &mut self.arm);
        }
    }
}

fn abandon_arm(token: &Arc<Token>, arm: &mut dyn waiter::Arm) {
    waiter::abandon(token, &mut [arm]);
}
