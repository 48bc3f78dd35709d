//! Test helpers: log capture and phase markers.
//!
//! Unit tests and integration tests call [`init_test_logging`] first so
//! runtime events show up next to assertion failures. `RUST_LOG` overrides
//! the default `strand=debug` filter.

use std::sync::Once;
use std::time::Duration;

#[doc(hidden)]
pub use tracing;

static INIT: Once = Once::new();

/// Installs a test-writer subscriber once per process.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strand=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// Builds a small runtime for tests: `workers` threads and a fast deadlock check.
pub fn test_runtime(workers: usize) -> crate::runtime::Runtime {
    crate::runtime::RuntimeBuilder::new()
        .worker_threads(workers)
        .deadlock_check_interval(Some(Duration::from_millis(20)))
        .build()
        .expect("test runtime config is valid")
}

/// Marks the start of a named test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(phase = %$name, "test phase start")
    };
}

/// Marks successful completion of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(test = %$name, "test complete")
    };
    ($name:expr, $($field:tt)+) => {
        $crate::test_utils::tracing::info!(test = %$name, $($field)+, "test complete")
    };
}

/// Asserts a condition, logging the expectation and the observed value first.
///
/// `assert_with_log!(cond, "what is checked", expected, actual)`
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        let ok = $cond;
        $crate::test_utils::tracing::debug!(
            check = %$msg,
            expected = ?$expected,
            actual = ?$actual,
            ok,
            "assertion"
        );
        assert!(ok, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    }};
}
