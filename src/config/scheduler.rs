//! Scheduler configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// What happens to queued groups when the scheduler is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run every queued group before the workers exit.
    #[default]
    Drain,
    /// Drop queued groups unexecuted, releasing their contexts.
    Discard,
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "discard" => Ok(Self::Discard),
            other => Err(format!("unknown shutdown policy `{other}`")),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on the worker threads of any single class.
    pub max_threads_per_class: usize,
    /// Hardware thread count to size classes from. Detected when `None`.
    pub hardware_threads: Option<usize>,
    /// Yields `wait_for` performs before parking. Spins forever when `None`.
    pub wait_spin_limit: Option<u32>,
    /// Fate of queued work on destroy.
    pub shutdown: ShutdownPolicy,
    /// Stack size for worker threads. Platform default when `None`.
    pub thread_stack_size: Option<usize>,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
    /// Pin workers to cores.
    pub pin_threads: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads_per_class: usize::MAX,
            hardware_threads: None,
            wait_spin_limit: None,
            shutdown: ShutdownPolicy::Drain,
            thread_stack_size: None,
            thread_name_prefix: "jobs".into(),
            pin_threads: false,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the worker threads of each class.
    #[must_use]
    pub const fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads_per_class = max;
        self
    }

    /// Size classes as if the machine had `threads` hardware threads.
    #[must_use]
    pub const fn with_hardware_threads(mut self, threads: usize) -> Self {
        self.hardware_threads = Some(threads);
        self
    }

    /// Park waiters after `spins` yields.
    #[must_use]
    pub const fn with_wait_spin_limit(mut self, spins: u32) -> Self {
        self.wait_spin_limit = Some(spins);
        self
    }

    /// Choose what destroy does with queued work.
    #[must_use]
    pub const fn with_shutdown(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Enable or disable core pinning.
    #[must_use]
    pub const fn with_pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    /// Hardware threads used for sizing: the override or the detected count.
    #[must_use]
    pub fn cores(&self) -> usize {
        self.hardware_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads_per_class == 0 {
            return Err("max_threads_per_class must be greater than 0".into());
        }
        if self.hardware_threads == Some(0) {
            return Err("hardware_threads must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `JOBS_*` environment variables, loading a
    /// `.env` file first when one exists.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("JOBS_MAX_THREADS") {
            cfg.max_threads_per_class = v.trim().parse().context("JOBS_MAX_THREADS")?;
        }
        if let Some(v) = lookup("JOBS_HARDWARE_THREADS") {
            cfg.hardware_threads = Some(v.trim().parse().context("JOBS_HARDWARE_THREADS")?);
        }
        if let Some(v) = lookup("JOBS_WAIT_SPIN_LIMIT") {
            cfg.wait_spin_limit = Some(v.trim().parse().context("JOBS_WAIT_SPIN_LIMIT")?);
        }
        if let Some(v) = lookup("JOBS_SHUTDOWN") {
            cfg.shutdown = v
                .parse()
                .map_err(|e| anyhow::anyhow!("JOBS_SHUTDOWN: {e}"))?;
        }
        if let Some(v) = lookup("JOBS_STACK_SIZE") {
            cfg.thread_stack_size = Some(v.trim().parse().context("JOBS_STACK_SIZE")?);
        }
        if let Some(v) = lookup("JOBS_THREAD_PREFIX") {
            cfg.thread_name_prefix = v;
        }
        if let Some(v) = lookup("JOBS_PIN_THREADS") {
            cfg.pin_threads = v.trim().parse().context("JOBS_PIN_THREADS")?;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}
