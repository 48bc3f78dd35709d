//! Runtime builder.

use super::deadlock::DeadlockMonitor;
use super::scheduler::local_queue::LocalQueue;
use super::scheduler::worker;
use super::shared::Shared;
use super::{Handle, Runtime};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::time::TimerDriver;
use crate::time::driver::DriverHook;
use crate::tracing_compat::info;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Configures and starts a [`Runtime`].
///
/// ```no_run
/// use std::time::Duration;
/// use strand::runtime::RuntimeBuilder;
///
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .time_slice(Duration::from_millis(5))
///     .build()
///     .unwrap();
/// # drop(runtime);
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Starts from [`RuntimeConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub const fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Starts from a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_path(path: impl AsRef<std::path::Path>) -> Result<Self, RuntimeError> {
        Ok(Self::from_config(RuntimeConfig::from_toml_path(path)?))
    }

    /// Number of worker threads.
    pub const fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Capacity for `Handle::channel`. Zero gives rendezvous channels.
    pub const fn default_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.default_channel_capacity = capacity;
        self
    }

    /// Coop time slice.
    pub const fn time_slice(mut self, slice: Duration) -> Self {
        self.config.time_slice = slice;
        self
    }

    /// Timer coalescing granularity.
    pub const fn deadline_resolution(mut self, resolution: Duration) -> Self {
        self.config.deadline_resolution = resolution;
        self
    }

    /// Deadlock sampling interval, `None` to disable detection.
    pub const fn deadlock_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.deadlock_check_interval = interval;
        self
    }

    /// Worker thread name prefix.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validates the configuration and starts all threads.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        self.config.validate()?;
        let config = self.config;
        let worker_count = config.worker_threads;

        let locals: Vec<LocalQueue> = (0..worker_count).map(|_| LocalQueue::new()).collect();
        let stealers = locals.iter().map(LocalQueue::stealer).collect();
        let timer = TimerDriver::new(config.deadline_resolution);
        let check_interval = config.deadlock_check_interval;
        let prefix = config.thread_name_prefix.clone();
        let shared = Arc::new(Shared::new(config, stealers, timer.clone()));

        let mut workers = Vec::with_capacity(worker_count);
        for (id, local) in locals.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{id}"))
                .spawn(move || worker::run(worker_shared, id, local));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.begin_shutdown();
                    for handle in workers {
                        super::join_thread(handle);
                    }
                    return Err(RuntimeError::Spawn(err));
                }
            }
        }

        let hook = check_interval.map(|interval| {
            let weak = Arc::downgrade(&shared);
            let mut monitor = DeadlockMonitor::new();
            DriverHook {
                interval,
                tick: Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        monitor.tick(&shared);
                    }
                }),
            }
        });
        let driver_timer = timer.clone();
        let driver = thread::Builder::new()
            .name("strand-driver".to_string())
            .spawn(move || driver_timer.run(hook));
        let driver = match driver {
            Ok(handle) => handle,
            Err(err) => {
                shared.begin_shutdown();
                for handle in workers {
                    super::join_thread(handle);
                }
                return Err(RuntimeError::Spawn(err));
            }
        };

        info!(
            workers = worker_count,
            deadlock_check = ?check_interval,
            "runtime started"
        );
        Ok(Runtime::from_parts(
            Handle { shared },
            workers,
            Some(driver),
        ))
    }
}
