//! Core types shared across the runtime.
//!
//! - [`id`]: Task identifiers
//! - [`cancel`]: Cancellation reason and kind types

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, CancelReason};
pub use id::TaskId;
