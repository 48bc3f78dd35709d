//! Combinators over channel operations.
//!
//! - [`select`]: wait on several sends and receives at once, with an
//!   optional default and timeout.
//!
//! Deadlines for single futures live in [`crate::time::timeout`].

pub mod select;

pub use select::{ArmKey, Select, SelectFuture, Selected};
