//! Work-stealing scheduler.

pub(crate) mod global_queue;
pub(crate) mod local_queue;
pub(crate) mod parker;
pub(crate) mod stealing;
pub(crate) mod worker;
