//! Multi-way channel select.
//!
//! A [`Select`] collects send and receive arms, optionally a default and a
//! deadline, and resolves to exactly one of them:
//!
//! 1. If any arms can proceed, one of them is performed. Arms are scanned in
//!    a fresh random order on every poll, so simultaneously ready arms are
//!    chosen uniformly.
//! 2. Otherwise, with a default, the default is chosen without waiting.
//! 3. Otherwise the select parks on every arm until one becomes ready or the
//!    deadline passes.
//!
//! All arms of one select share a claim token, so a counterpart can complete
//! at most one of them. The others are withdrawn without side effects.
//!
//! ```no_run
//! use strand::channel::bounded;
//! use strand::combinator::Select;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let (_tx_a, rx_a) = bounded::<u32>(1);
//! let (_tx_b, rx_b) = bounded::<&str>(1);
//!
//! let mut sel = Select::new();
//! let a = sel.recv(&rx_a);
//! let b = sel.recv(&rx_b);
//! sel.timeout(Duration::from_millis(100));
//!
//! let mut out = sel.select().await;
//! if let Some(v) = out.take(a) {
//!     println!("a: {v:?}");
//! } else if let Some(v) = out.take(b) {
//!     println!("b: {v:?}");
//! } else {
//!     assert!(out.is_timeout());
//! }
//! # }
//! ```

use crate::channel::shared::{RecvArm, SendArm};
use crate::channel::waiter::{self, Arm, Drive, Token};
use crate::channel::{Receiver, SendError, Sender};
use crate::runtime::coop;
use crate::time::Sleep;
use crate::util::det_rng::with_thread_rng;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type ArmList<'a> = SmallVec<[&'a mut dyn Arm; 8]>;

/// A channel arm whose output can be handed back type-erased.
trait SelectArm: Send {
    fn arm(&mut self) -> &mut dyn Arm;
    fn take_output(&mut self) -> Box<dyn Any + Send>;
}

impl<T: Send + 'static> SelectArm for RecvArm<T> {
    fn arm(&mut self) -> &mut dyn Arm {
        self
    }

    fn take_output(&mut self) -> Box<dyn Any + Send> {
        Box::new(self.take().flatten())
    }
}

impl<T: Send + 'static> SelectArm for SendArm<T> {
    fn arm(&mut self) -> &mut dyn Arm {
        self
    }

    fn take_output(&mut self) -> Box<dyn Any + Send> {
        Box::new(self.take().unwrap_or(Ok(())))
    }
}

/// Typed handle to one arm of a [`Select`], used to recover its output.
pub struct ArmKey<O> {
    index: usize,
    _output: PhantomData<fn() -> O>,
}

impl<O> ArmKey<O> {
    /// Position of the arm in the order it was added.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<O> Clone for ArmKey<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for ArmKey<O> {}

impl<O> fmt::Debug for ArmKey<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArmKey({})", self.index)
    }
}

/// Builder for a multi-way select.
#[must_use = "a Select does nothing until `select` or `try_select` is called"]
pub struct Select {
    arms: Vec<Box<dyn SelectArm>>,
    default: bool,
    deadline: Option<Instant>,
}

impl Default for Select {
    fn default() -> Self {
        Self::new()
    }
}

impl Select {
    /// An empty select.
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            default: false,
            deadline: None,
        }
    }

    /// Adds a receive arm. Its output is `None` if the channel is closed and
    /// drained.
    pub fn recv<T: Send + 'static>(&mut self, rx: &Receiver<T>) -> ArmKey<Option<T>> {
        self.push(Box::new(RecvArm::new(Arc::clone(rx.chan()))))
    }

    /// Adds a send arm. If another arm wins, `value` is dropped with the
    /// select.
    pub fn send<T: Send + 'static>(
        &mut self,
        tx: &Sender<T>,
        value: T,
    ) -> ArmKey<Result<(), SendError<T>>> {
        self.push(Box::new(SendArm::new(Arc::clone(tx.chan()), value)))
    }

    /// Resolve immediately with the default when no arm is ready.
    pub fn default_case(&mut self) -> &mut Self {
        self.default = true;
        self
    }

    /// Give up `limit` from now. The earlier of several deadlines wins.
    pub fn timeout(&mut self, limit: Duration) -> &mut Self {
        self.deadline(Instant::now() + limit)
    }

    /// Give up at `deadline`.
    pub fn deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Number of channel arms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arms.len()
    }

    /// True if no channel arms were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    fn push<O>(&mut self, arm: Box<dyn SelectArm>) -> ArmKey<O> {
        let index = self.arms.len();
        self.arms.push(arm);
        ArmKey {
            index,
            _output: PhantomData,
        }
    }

    /// Waits for one arm, the default or the deadline.
    ///
    /// # Panics
    ///
    /// Panics if there are no arms, no default and no deadline: such a
    /// select could never complete.
    pub fn select(self) -> SelectFuture {
        assert!(
            !self.arms.is_empty() || self.default || self.deadline.is_some(),
            "select with no arms, no default and no deadline would wait forever"
        );
        SelectFuture {
            token: Token::new(),
            arms: self.arms,
            default: self.default,
            sleep: self.deadline.map(Sleep::new),
            finished: false,
        }
    }

    /// Performs one ready arm if any, without waiting. Resolves to the
    /// default otherwise, whether or not one was requested.
    pub fn try_select(mut self) -> Selected {
        let token = Token::new();
        let order = shuffled_order(self.arms.len());
        let mut cx = Context::from_waker(Waker::noop());
        let outcome = {
            let mut arms: ArmList<'_> = self.arms.iter_mut().map(|a| a.arm()).collect();
            waiter::drive(&token, &mut arms, &order, false, &mut cx)
        };
        match outcome {
            Drive::Ready(i) => Selected::arm(i, self.arms[i].take_output()),
            Drive::NoneReady | Drive::Pending => Selected::with(Outcome::Default),
        }
    }
}

impl fmt::Debug for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("arms", &self.arms.len())
            .field("default", &self.default)
            .field("deadline", &self.deadline)
            .finish()
    }
}

fn shuffled_order(len: usize) -> SmallVec<[usize; 8]> {
    let mut order: SmallVec<[usize; 8]> = (0..len).collect();
    with_thread_rng(|rng| rng.shuffle(&mut order));
    order
}

/// Future returned by [`Select::select`].
///
/// Dropping it before completion withdraws every arm. A receive that had
/// already been handed a value puts it back at the front of its channel.
#[must_use = "futures do nothing unless polled"]
pub struct SelectFuture {
    token: Arc<Token>,
    arms: Vec<Box<dyn SelectArm>>,
    default: bool,
    sleep: Option<Sleep>,
    finished: bool,
}

impl SelectFuture {
    fn give_up(&mut self) -> Option<usize> {
        let mut arms: ArmList<'_> = self.arms.iter_mut().map(|a| a.arm()).collect();
        waiter::give_up(&self.token, &mut arms)
    }
}

impl Future for SelectFuture {
    type Output = Selected;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Selected> {
        if coop::poll_proceed(cx).is_pending() {
            return Poll::Pending;
        }
        let this = &mut *self;
        assert!(!this.finished, "SelectFuture polled after completion");

        let order = shuffled_order(this.arms.len());
        let outcome = {
            let mut arms: ArmList<'_> = this.arms.iter_mut().map(|a| a.arm()).collect();
            waiter::drive(&this.token, &mut arms, &order, !this.default, cx)
        };
        match outcome {
            Drive::Ready(i) => {
                this.finished = true;
                return Poll::Ready(Selected::arm(i, this.arms[i].take_output()));
            }
            Drive::NoneReady => {
                this.finished = true;
                return Poll::Ready(Selected::with(Outcome::Default));
            }
            Drive::Pending => {}
        }

        let Some(sleep) = this.sleep.as_mut() else {
            return Poll::Pending;
        };
        if Pin::new(sleep).poll(cx).is_pending() {
            return Poll::Pending;
        }
        this.finished = true;
        match this.give_up() {
            Some(i) => Poll::Ready(Selected::arm(i, this.arms[i].take_output())),
            None => Poll::Ready(Selected::with(Outcome::Timeout)),
        }
    }
}

impl Drop for SelectFuture {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut arms: ArmList<'_> = self.arms.iter_mut().map(|a| a.arm()).collect();
        waiter::abandon(&self.token, &mut arms);
    }
}

impl fmt::Debug for SelectFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectFuture")
            .field("arms", &self.arms.len())
            .field("default", &self.default)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Arm(usize),
    Default,
    Timeout,
}

/// The resolved branch of a select.
pub struct Selected {
    outcome: Outcome,
    output: Option<Box<dyn Any + Send>>,
}

impl Selected {
    fn arm(index: usize, output: Box<dyn Any + Send>) -> Self {
        Self {
            outcome: Outcome::Arm(index),
            output: Some(output),
        }
    }

    const fn with(outcome: Outcome) -> Self {
        Self {
            outcome,
            output: None,
        }
    }

    /// Index of the winning arm, `None` for default or timeout.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self.outcome {
            Outcome::Arm(i) => Some(i),
            Outcome::Default | Outcome::Timeout => None,
        }
    }

    /// True if the default was chosen.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        matches!(self.outcome, Outcome::Default)
    }

    /// True if the deadline passed first.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.outcome, Outcome::Timeout)
    }

    /// True if `key`'s arm won.
    #[must_use]
    pub const fn is<O>(&self, key: &ArmKey<O>) -> bool {
        matches!(self.outcome, Outcome::Arm(i) if i == key.index)
    }

    /// Takes the output of `key`'s arm if it won. Returns `None` for any
    /// other arm, or if the output was already taken.
    pub fn take<O: 'static>(&mut self, key: ArmKey<O>) -> Option<O> {
        if !self.is(&key) {
            return None;
        }
        self.output
            .take()
            .and_then(|out| out.downcast::<O>().ok())
            .map(|out| *out)
    }
}

impl fmt::Debug for Selected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selected")
            .field("outcome", &self.outcome)
            .field("taken", &self.output.is_none())
            .finish()
    }
}
