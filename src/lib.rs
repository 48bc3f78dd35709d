//! Strand: a work-stealing task runtime with CSP-style coordination primitives.
//!
//! # Overview
//!
//! Strand runs many lightweight tasks on a fixed pool of OS worker threads.
//! A task that blocks on a channel, a lock, a wait group or a timer parks without
//! occupying its thread, and is re-enqueued when the thing it waits for happens.
//! Idle workers steal from busy ones. A driver thread fires timers and watches for
//! the moment every live task is blocked with nothing left that could wake it, and
//! reports that as a deadlock instead of hanging.
//!
//! # Module Structure
//!
//! - [`runtime`]: Scheduler, task spawning, join handles, deadlock detection
//! - [`channel`]: Rendezvous and bounded FIFO channels
//! - [`combinator`]: Multi-way `select` over channel operations
//! - [`sync`]: Task-aware `Mutex` and `WaitGroup`
//! - [`context`]: Hierarchical cancellation with deadlines and scoped values
//! - [`pool`]: Fixed-size worker pool fed from a job channel
//! - [`time`]: `sleep`, `sleep_until` and `timeout`
//! - [`types`]: Identifiers and cancellation reasons
//! - [`config`]: Runtime configuration and optional TOML loading
//! - [`error`](mod@error): Error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use strand::channel;
//! use strand::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(2).build().unwrap();
//! let handle = runtime.handle();
//! let total = runtime
//!     .block_on(async move {
//!         let (tx, rx) = channel::bounded::<u32>(4);
//!         handle.spawn(async move {
//!             for i in 1..=10 {
//!                 tx.send(i).await.unwrap();
//!             }
//!         });
//!         let mut sum = 0;
//!         while let Some(v) = rx.recv().await {
//!             sum += v;
//!         }
//!         sum
//!     })
//!     .unwrap();
//! assert_eq!(total, 55);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod channel;
pub mod combinator;
pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod types;

pub(crate) mod tracing_compat;
pub(crate) mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use channel::{Receiver, Sender, bounded, rendezvous};
pub use combinator::select::{ArmKey, Select, Selected};
pub use config::RuntimeConfig;
pub use context::{CancelHandle, Context, ContextKey};
pub use error::{Error, Result};
pub use pool::{PoolReport, WorkerExit, WorkerPool};
pub use runtime::{Handle, JoinHandle, Runtime, RuntimeBuilder, TaskState, yield_now};
pub use sync::{Mutex, MutexGuard, WaitGroup};
pub use types::{CancelKind, CancelReason, TaskId};
