//! Task-aware synchronization primitives.
//!
//! - [`Mutex`]: FIFO-fair mutual exclusion with scoped guards
//! - [`WaitGroup`]: counting barrier
//!
//! Both suspend the waiting task rather than its worker thread.

pub mod mutex;
pub mod wait_group;

pub use mutex::{Lock, LockOwned, Mutex, MutexGuard, OwnedMutexGuard, TryLockError, UnlockError};
pub use wait_group::{Wait, WaitGroup, WaitGroupError, WaitGroupGuard};
