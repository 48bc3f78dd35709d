//! Logging shim.
//!
//! With the `tracing-integration` feature (on by default) these are the
//! `tracing` macros. Without it they expand to nothing, so call sites never
//! need their own `cfg` guards.

#[cfg(feature = "tracing-integration")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! trace {
        ($($arg:tt)*) => {{}};
    }
    macro_rules! debug {
        ($($arg:tt)*) => {{}};
    }
    macro_rules! info {
        ($($arg:tt)*) => {{}};
    }
    macro_rules! warn {
        ($($arg:tt)*) => {{}};
    }
    macro_rules! error {
        ($($arg:tt)*) => {{}};
    }

    #[allow(unused_imports)]
    pub(crate) use {debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, info, trace, warn};
