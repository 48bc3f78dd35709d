//! Fixed-size worker pools over channels.
//!
//! A [`WorkerPool`] starts `worker_count` tasks that each loop: receive a
//! job, run the work function on it, send the result. A worker stops when the
//! jobs channel is closed and drained, when the results channel stops
//! accepting values, or when the pool's context is cancelled.
//!
//! The owner closes the jobs channel once all work is submitted (receivers
//! never close). [`WorkerPool::join`] waits for every worker through a
//! [`WaitGroup`] and only then closes the results channel, so no worker ever
//! sends on a channel that was closed under it.
//!
//! ```no_run
//! use strand::{RuntimeBuilder, WorkerPool, bounded};
//!
//! let rt = RuntimeBuilder::new().worker_threads(2).build().unwrap();
//! let handle = rt.handle();
//! let doubled = rt.block_on(async move {
//!     let (jobs_tx, jobs_rx) = bounded::<u32>(5);
//!     let (results_tx, results_rx) = bounded::<u32>(5);
//!     let pool = WorkerPool::new(&handle, 3, jobs_rx, results_tx, |job| async move { job * 2 })
//!         .unwrap();
//!     for job in 1..=5 {
//!         jobs_tx.send(job).await.unwrap();
//!     }
//!     drop(jobs_tx);
//!     let mut out = Vec::new();
//!     while let Some(r) = results_rx.recv().await {
//!         out.push(r);
//!         if out.len() == 5 {
//!             break;
//!         }
//!     }
//!     pool.join().await;
//!     out
//! });
//! # drop(doubled);
//! ```

use crate::channel::{Receiver, Sender};
use crate::combinator::Select;
use crate::context::Context;
use crate::error::{ContextError, JoinError, PoolError};
use crate::runtime::{Handle, JoinHandle};
use crate::sync::{WaitGroup, WaitGroupGuard};
use crate::tracing_compat::{debug, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Why one pool worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The jobs channel was closed and drained.
    Drained,
    /// The pool's context stopped.
    Cancelled(ContextError),
    /// The results channel refused a result.
    ResultsClosed,
    /// The work function panicked.
    Panicked(String),
    /// The runtime aborted the worker (shutdown or deadlock).
    Aborted(JoinError),
}

/// Outcome of a joined pool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolReport {
    /// Results successfully sent.
    pub processed: usize,
    /// One entry per worker, in start order.
    pub exits: Vec<WorkerExit>,
}

impl PoolReport {
    /// True if every worker stopped because the jobs ran out.
    #[must_use]
    pub fn all_drained(&self) -> bool {
        self.exits.iter().all(|e| *e == WorkerExit::Drained)
    }
}

/// A running pool. Dropping it detaches the workers; call
/// [`join`](Self::join) to wait for them.
pub struct WorkerPool<R> {
    group: WaitGroup,
    workers: Vec<JoinHandle<WorkerExit>>,
    results: Sender<R>,
    processed: Arc<AtomicUsize>,
}

struct WorkerSetup<J, R, F> {
    id: usize,
    jobs: Receiver<J>,
    results: Sender<R>,
    work: Arc<F>,
    ctx: Option<Context>,
    processed: Arc<AtomicUsize>,
    _guard: WaitGroupGuard,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Starts `worker_count` workers on `handle`.
    pub fn new<J, F, Fut>(
        handle: &Handle,
        worker_count: usize,
        jobs: Receiver<J>,
        results: Sender<R>,
        work: F,
    ) -> Result<Self, PoolError>
    where
        J: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::start(handle, None, worker_count, jobs, results, work)
    }

    /// Like [`new`](Self::new), but every worker also stops once `ctx` does.
    pub fn with_context<J, F, Fut>(
        handle: &Handle,
        ctx: &Context,
        worker_count: usize,
        jobs: Receiver<J>,
        results: Sender<R>,
        work: F,
    ) -> Result<Self, PoolError>
    where
        J: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::start(handle, Some(ctx.clone()), worker_count, jobs, results, work)
    }

    fn start<J, F, Fut>(
        handle: &Handle,
        ctx: Option<Context>,
        worker_count: usize,
        jobs: Receiver<J>,
        results: Sender<R>,
        work: F,
    ) -> Result<Self, PoolError>
    where
        J: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }
        let group = WaitGroup::new();
        let work = Arc::new(work);
        let processed = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            // A fresh group at zero has no released waiters, so this
            // cannot fail.
            let Ok(guard) = group.guard() else {
                unreachable!("fresh wait group rejected an increment");
            };
            let setup = WorkerSetup {
                id,
                jobs: jobs.clone(),
                results: results.clone(),
                work: Arc::clone(&work),
                ctx: ctx.clone(),
                processed: Arc::clone(&processed),
                _guard: guard,
            };
            workers.push(handle.spawn(run_worker(setup)));
        }
        debug!(workers = worker_count, "worker pool started");
        Ok(Self {
            group,
            workers,
            results,
            processed,
        })
    }

    /// Number of workers started.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Results sent so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// Waits for every worker to stop, then closes the results channel.
    pub async fn join(self) -> PoolReport {
        self.group.wait().await;
        let mut exits = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            let exit = match worker.await {
                Ok(exit) => exit,
                Err(JoinError::Panicked(message)) => {
                    warn!(%message, "pool worker panicked");
                    WorkerExit::Panicked(message)
                }
                Err(err) => WorkerExit::Aborted(err),
            };
            exits.push(exit);
        }
        let _ = self.results.close();
        PoolReport {
            processed: self.processed.load(Ordering::Acquire),
            exits,
        }
    }
}

impl<R> fmt::Debug for WorkerPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("outstanding", &self.group.count())
            .finish_non_exhaustive()
    }
}

async fn run_worker<J, R, F, Fut>(setup: WorkerSetup<J, R, F>) -> WorkerExit
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let id = setup.id;
    let exit = worker_loop(&setup).await;
    debug!(worker = id, exit = ?exit, "pool worker stopped");
    exit
}

async fn worker_loop<J, R, F, Fut>(setup: &WorkerSetup<J, R, F>) -> WorkerExit
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let done = setup.ctx.as_ref().map(Context::done);
    loop {
        if let Some(err) = setup.ctx.as_ref().and_then(Context::err) {
            return WorkerExit::Cancelled(err);
        }

        let job = match &done {
            None => setup.jobs.recv().await,
            Some(done) => {
                let mut sel = Select::new();
                let job = sel.recv(&setup.jobs);
                sel.recv(done);
                let mut out = sel.select().await;
                if !out.is(&job) {
                    return WorkerExit::Cancelled(cancel_reason(setup.ctx.as_ref()));
                }
                out.take(job).flatten()
            }
        };
        let Some(job) = job else {
            return WorkerExit::Drained;
        };

        let result = (setup.work)(job).await;

        let sent = match &done {
            None => setup.results.send(result).await.is_ok(),
            Some(done) => {
                let mut sel = Select::new();
                let send = sel.send(&setup.results, result);
                sel.recv(done);
                let mut out = sel.select().await;
                match out.take(send) {
                    Some(sent) => sent.is_ok(),
                    None => return WorkerExit::Cancelled(cancel_reason(setup.ctx.as_ref())),
                }
            }
        };
        if !sent {
            return WorkerExit::ResultsClosed;
        }
        setup.processed.fetch_add(1, Ordering::AcqRel);
    }
}

fn cancel_reason(ctx: Option<&Context>) -> ContextError {
    ctx.and_then(Context::err).unwrap_or(ContextError::Cancelled)
}
