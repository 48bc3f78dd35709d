//! Sleep and timeout primitives.
//!
//! Timers inside a runtime are served by that runtime's driver thread, which
//! also counts them as pending wakeups for deadlock detection. Timers created
//! elsewhere use a lazily started standalone driver.

pub mod driver;
mod sleep;
mod timeout;

pub use driver::{TimerDriver, TimerHandle};
pub use sleep::{Sleep, sleep, sleep_until};
pub use timeout::{Timeout, timeout};
