//! Cancellation contexts.
//!
//! A [`Context`] pairs a cancellation scope with a chain of metadata values.
//! Scopes form a tree:
//!
//! - Cancelling a scope cancels every descendant, including ones created
//!   after the cancel. The first reason recorded is inherited unchanged.
//! - Cancelling a scope never affects its parent or siblings.
//! - A parent holds its live children. A child holds only a weak link to its
//!   parent and unlinks itself once it is cancelled.
//!
//! [`Context::with_value`] does not open a new scope. The returned context
//! stops exactly when its parent does, and any scope created under it hangs
//! off the parent's scope. Values are an immutable chain shared by every
//! context derived from the one that attached them, so a lookup never
//! depends on an intermediate context still being alive.
//!
//! A stopped context closes its [`done`](Context::done) channel, so the
//! receiver can be raced against work in a [`Select`](crate::combinator::Select):
//!
//! ```no_run
//! use strand::combinator::Select;
//! use strand::context;
//!
//! # async fn demo(jobs: strand::Receiver<u32>) {
//! let (ctx, cancel) = context::background().with_cancel();
//! let done = ctx.done();
//! loop {
//!     let mut sel = Select::new();
//!     let job = sel.recv(&jobs);
//!     sel.recv(&done);
//!     let mut out = sel.select().await;
//!     match out.take(job) {
//!         Some(Some(job)) => println!("job {job}"),
//!         _ => break,
//!     }
//! }
//! cancel.cancel();
//! # }
//! ```
//!
//! Deadlines are armed on the timer driver of the current runtime (or the
//! standalone driver outside one). An elapsed deadline is also noticed
//! lazily by [`Context::err`] and [`Context::is_done`].

mod key;

pub use key::ContextKey;

use crate::channel::{Receiver, Sender, rendezvous};
use crate::error::ContextError;
use crate::time::{TimerDriver, TimerHandle, driver};
use crate::tracing_compat::trace;
use crate::types::{CancelKind, CancelReason};
use key::KeyId;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Wake, Waker};
use std::time::{Duration, Instant};

type Value = Arc<dyn Any + Send + Sync>;

/// One link of a context's metadata chain.
struct Values {
    key: KeyId,
    value: Value,
    parent: Option<Arc<Values>>,
}

struct ScopeState {
    reason: Option<CancelReason>,
    children: Vec<Arc<Scope>>,
    timer: Option<(TimerDriver, TimerHandle)>,
}

// Only the shared root is ever freed without being cancelled first, since
// every other scope is owned by a `CancelHandle` that cancels on drop. The
// root is never freed, so `done_tx` never closes the channel by going away.
struct Scope {
    parent: Option<Weak<Scope>>,
    // Earliest deadline of this scope and its ancestors.
    deadline: Option<Instant>,
    root: bool,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
    state: Mutex<ScopeState>,
}

static ROOT: OnceLock<Arc<Scope>> = OnceLock::new();

impl Scope {
    fn new(parent: Option<Weak<Self>>, deadline: Option<Instant>) -> Arc<Self> {
        let (done_tx, done_rx) = rendezvous();
        Arc::new(Self {
            root: parent.is_none(),
            parent,
            deadline,
            done_tx,
            done_rx,
            state: Mutex::new(ScopeState {
                reason: None,
                children: Vec::new(),
                timer: None,
            }),
        })
    }

    fn root() -> Arc<Self> {
        Arc::clone(ROOT.get_or_init(|| Self::new(None, None)))
    }

    fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.state.lock().reason.clone() {
            return Some(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                let reason = CancelReason::timeout();
                self.cancel(reason.clone());
                Some(reason)
            }
            _ => None,
        }
    }

    /// Records `reason`, cancels the subtree and unlinks from the parent.
    /// False if already cancelled.
    fn cancel(&self, reason: CancelReason) -> bool {
        if self.root {
            return false;
        }
        let (children, timer) = {
            let mut state = self.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            (std::mem::take(&mut state.children), state.timer.take())
        };
        if let Some((driver, handle)) = timer {
            driver.cancel(&handle);
        }
        let _ = self.done_tx.close();
        trace!(reason = %reason, children = children.len(), "context cancelled");
        for child in &children {
            child.cancel(reason.clone());
        }
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .state
                .lock()
                .children
                .retain(|c| !std::ptr::eq(Arc::as_ptr(c), self));
        }
        true
    }

    /// Links a new child, cancelling it straight away if this scope already
    /// stopped.
    fn adopt(&self, child: &Arc<Self>) {
        if self.root {
            return;
        }
        let inherited = {
            let mut state = self.state.lock();
            match state.reason.clone() {
                Some(reason) => Some(reason),
                None => {
                    state.children.push(Arc::clone(child));
                    None
                }
            }
        };
        if let Some(reason) = inherited {
            child.cancel(reason);
        }
    }

    /// Arms a timer for this scope's own deadline.
    fn arm(self: &Arc<Self>, deadline: Instant) {
        if Instant::now() >= deadline {
            self.cancel(CancelReason::timeout());
            return;
        }
        let driver = driver::current();
        let waker = Waker::from(Arc::new(DeadlineWake(Arc::downgrade(self))));
        let handle = driver.register(deadline, waker);
        let mut state = self.state.lock();
        if state.reason.is_some() {
            drop(state);
            driver.cancel(&handle);
        } else {
            state.timer = Some((driver, handle));
        }
    }
}

/// Fires a scope's deadline from the timer driver.
struct DeadlineWake(Weak<Scope>);

impl Wake for DeadlineWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(scope) = self.0.upgrade() {
            scope.cancel(CancelReason::timeout());
        }
    }
}

/// A cancellation scope plus the values visible from it.
///
/// Cheap to clone; clones refer to the same scope.
#[derive(Clone)]
pub struct Context {
    scope: Arc<Scope>,
    values: Option<Arc<Values>>,
}

/// The root context: never cancelled, no deadline, no values.
///
/// Every call returns the same process-wide root.
#[must_use]
pub fn background() -> Context {
    Context {
        scope: Scope::root(),
        values: None,
    }
}

/// See [`Context::with_cancel`].
pub fn with_cancel(parent: &Context) -> (Context, CancelHandle) {
    parent.with_cancel()
}

/// See [`Context::with_timeout`].
pub fn with_timeout(parent: &Context, limit: Duration) -> (Context, CancelHandle) {
    parent.with_timeout(limit)
}

/// See [`Context::with_deadline`].
pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelHandle) {
    parent.with_deadline(deadline)
}

/// See [`Context::with_value`].
#[must_use]
pub fn with_value<T: Send + Sync + 'static>(
    parent: &Context,
    key: &ContextKey<T>,
    value: T,
) -> Context {
    parent.with_value(key, value)
}

impl Context {
    fn child(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let deadline = match (self.scope.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let scope = Scope::new(Some(Arc::downgrade(&self.scope)), deadline);
        self.scope.adopt(&scope);
        (
            Self {
                scope: Arc::clone(&scope),
                values: self.values.clone(),
            },
            CancelHandle {
                scope,
                values: self.values.clone(),
            },
        )
    }

    /// A child that stops when `cancel` is called, the handle is dropped, or
    /// this context stops.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.child(None)
    }

    /// A child that also stops `limit` from now.
    #[must_use]
    pub fn with_timeout(&self, limit: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + limit)
    }

    /// A child that also stops at `deadline`. An inherited earlier deadline
    /// still applies.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let inherited_earlier = self.scope.deadline.is_some_and(|d| d <= deadline);
        let (ctx, handle) = self.child(Some(deadline));
        if !inherited_earlier {
            handle.scope.arm(deadline);
        }
        (ctx, handle)
    }

    /// This context with `value` attached under `key`. It stops exactly when
    /// this context does.
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            values: Some(Arc::new(Values {
                key: key.id(),
                value: Arc::new(value),
                parent: self.values.clone(),
            })),
        }
    }

    /// A receiver closed once this context stops. Receiving on it yields
    /// `None` at that point, and never yields a value before.
    #[must_use]
    pub fn done(&self) -> Receiver<()> {
        if !self.scope.root {
            // Observe an elapsed deadline whose timer has not fired yet.
            let _ = self.scope.reason();
        }
        self.scope.done_rx.clone()
    }

    /// True once this context has stopped.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.scope.reason().is_some()
    }

    /// Why the context stopped, `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        self.scope.reason().map(|r| r.as_error())
    }

    /// The full cancellation reason, including any message.
    #[must_use]
    pub fn cause(&self) -> Option<CancelReason> {
        self.scope.reason()
    }

    /// The effective deadline, inherited or own.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline
    }

    /// Looks `key` up, most recently attached value first.
    #[must_use]
    pub fn value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let id = key.id();
        let mut link = self.values.as_ref();
        while let Some(current) = link {
            if current.key == id {
                return Arc::clone(&current.value).downcast::<T>().ok();
            }
            link = current.parent.as_ref();
        }
        None
    }

    /// Waits until this context stops and returns why.
    pub fn cancelled(&self) -> impl Future<Output = ContextError> + Send + 'static {
        let done = self.done();
        let ctx = self.clone();
        async move {
            // Nothing is ever sent; the receive ends when the channel closes.
            let _ = done.recv().await;
            ctx.err().unwrap_or(ContextError::Cancelled)
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.scope.root)
            .field("deadline", &self.scope.deadline)
            .field("reason", &self.scope.state.lock().reason)
            .finish_non_exhaustive()
    }
}

/// Cancels its context when told to, or when dropped.
///
/// Dropping the handle as soon as the scope ends releases the deadline
/// timer promptly and unlinks the scope from its parent.
#[must_use = "dropping a CancelHandle cancels its context immediately"]
pub struct CancelHandle {
    scope: Arc<Scope>,
    values: Option<Arc<Values>>,
}

impl CancelHandle {
    /// Cancels the context. Idempotent.
    pub fn cancel(&self) {
        self.scope.cancel(CancelReason::new(CancelKind::User));
    }

    /// Cancels with a message recorded in [`Context::cause`].
    pub fn cancel_with(&self, message: &'static str) {
        self.scope.cancel(CancelReason::user(message));
    }

    /// The context this handle cancels.
    #[must_use]
    pub fn context(&self) -> Context {
        Context {
            scope: Arc::clone(&self.scope),
            values: self.values.clone(),
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.scope.cancel(CancelReason::new(CancelKind::User));
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}
