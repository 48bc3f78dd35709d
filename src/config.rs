//! Runtime configuration.
//!
//! [`RuntimeConfig`] is plain data with defaults; `RuntimeBuilder` edits one
//! and validates it before any thread is started. With the `config-file`
//! feature a config can also be loaded from TOML, durations given in
//! milliseconds:
//!
//! ```toml
//! worker_threads = 4
//! default_channel_capacity = 0
//! time_slice_ms = 10
//! deadline_resolution_ms = 1
//! deadlock_check_interval_ms = 50   # 0 disables detection
//! thread_name_prefix = "strand-worker"
//! ```

use crate::error::ConfigError;
use std::time::Duration;

/// Default coop time slice before a task is asked to yield.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(10);
/// Default timer coalescing granularity.
pub const DEFAULT_DEADLINE_RESOLUTION: Duration = Duration::from_millis(1);
/// Default spacing between deadlock samples.
pub const DEFAULT_DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Tunables for a runtime instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker OS threads. Defaults to available parallelism.
    pub worker_threads: usize,
    /// Capacity used by `Handle::channel`. Zero means rendezvous.
    pub default_channel_capacity: usize,
    /// How long a task may run before blocking primitives ask it to yield.
    pub time_slice: Duration,
    /// Timer coalescing granularity for sleeps and context deadlines.
    pub deadline_resolution: Duration,
    /// Deadlock sampling interval. `None` disables detection.
    pub deadlock_check_interval: Option<Duration>,
    /// Worker thread name prefix. Workers are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
            default_channel_capacity: 0,
            time_slice: DEFAULT_TIME_SLICE,
            deadline_resolution: DEFAULT_DEADLINE_RESOLUTION,
            deadlock_check_interval: Some(DEFAULT_DEADLOCK_CHECK_INTERVAL),
            thread_name_prefix: "strand-worker".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Rejects nonsensical settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.time_slice.is_zero() {
            return Err(ConfigError::ZeroTimeSlice);
        }
        if self.deadline_resolution.is_zero() {
            return Err(ConfigError::ZeroResolution);
        }
        if self.deadlock_check_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroDeadlockInterval);
        }
        Ok(())
    }
}

#[cfg(feature = "config-file")]
mod file {
    use super::RuntimeConfig;
    use crate::error::ConfigError;
    use serde::Deserialize;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct FileConfig {
        worker_threads: Option<usize>,
        default_channel_capacity: Option<usize>,
        time_slice_ms: Option<u64>,
        deadline_resolution_ms: Option<u64>,
        deadlock_check_interval_ms: Option<u64>,
        thread_name_prefix: Option<String>,
    }

    impl RuntimeConfig {
        /// Parses a TOML document, filling absent keys from defaults.
        pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
            let file: FileConfig = toml::from_str(input)?;
            let mut config = Self::default();
            if let Some(n) = file.worker_threads {
                config.worker_threads = n;
            }
            if let Some(cap) = file.default_channel_capacity {
                config.default_channel_capacity = cap;
            }
            if let Some(ms) = file.time_slice_ms {
                config.time_slice = Duration::from_millis(ms);
            }
            if let Some(ms) = file.deadline_resolution_ms {
                config.deadline_resolution = Duration::from_millis(ms);
            }
            if let Some(ms) = file.deadlock_check_interval_ms {
                config.deadlock_check_interval = (ms > 0).then(|| Duration::from_millis(ms));
            }
            if let Some(prefix) = file.thread_name_prefix {
                config.thread_name_prefix = prefix;
            }
            config.validate()?;
            Ok(config)
        }

        /// Reads and parses a TOML file.
        pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
            let text = std::fs::read_to_string(path)?;
            Self::from_toml_str(&text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads >= 1);
        assert_eq!(config.default_channel_capacity, 0);
        assert_eq!(config.time_slice, DEFAULT_TIME_SLICE);
        assert_eq!(config.thread_name_prefix, "strand-worker");
    }

    #[test]
    fn zero_values_rejected() {
        let mut config = RuntimeConfig {
            worker_threads: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroWorkers)));

        config.worker_threads = 2;
        config.time_slice = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeSlice)));

        config.time_slice = DEFAULT_TIME_SLICE;
        config.deadline_resolution = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroResolution)));

        config.deadline_resolution = DEFAULT_DEADLINE_RESOLUTION;
        config.deadlock_check_interval = Some(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDeadlockInterval)
        ));

        config.deadlock_check_interval = None;
        assert!(config.validate().is_ok());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_overrides_defaults() {
        let config = RuntimeConfig::from_toml_str(
            "worker_threads = 3\ntime_slice_ms = 5\ndeadlock_check_interval_ms = 0\n",
        )
        .expect("parse");
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.time_slice, Duration::from_millis(5));
        assert_eq!(config.deadlock_check_interval, None);
        assert_eq!(config.deadline_resolution, DEFAULT_DEADLINE_RESOLUTION);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_rejects_unknown_keys_and_invalid_values() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("workers = 3\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("worker_threads = 0\n"),
            Err(ConfigError::ZeroWorkers)
        ));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_from_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strand.toml");
        std::fs::write(&path, "thread_name_prefix = \"pool\"\n").expect("write");
        let config = RuntimeConfig::from_toml_path(&path).expect("load");
        assert_eq!(config.thread_name_prefix, "pool");
    }
}
