//! Work stealing logic.

use super::local_queue::{LocalQueue, Stealer};
use crate::runtime::task::Task;
use crate::util::DetRng;
use std::sync::Arc;

/// Tries to steal a batch from another worker into `dest`.
///
/// Starts at a random victim and walks all of them once, skipping `own`.
pub(crate) fn steal_task(
    stealers: &[Stealer],
    own: usize,
    dest: &LocalQueue,
    rng: &mut DetRng,
) -> Option<Arc<Task>> {
    let len = stealers.len();
    if len <= 1 {
        return None;
    }

    let start = rng.next_usize(len);
    for i in 0..len {
        let idx = (start + i) % len;
        if idx == own {
            continue;
        }
        if let Some(task) = stealers[idx].steal_into(dest) {
            return Some(task);
        }
    }

    None
}
