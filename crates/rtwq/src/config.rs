//! Platform configuration

use std::time::Duration;
use tracing::warn;

/// Tunables of a work queue platform
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Number of user queue handle slots
    pub max_user_queues: usize,

    /// Thread ceiling of standard (and window) queues
    pub standard_concurrency: usize,

    /// Thread ceiling of multithreaded queues
    pub wide_concurrency: usize,

    /// Period of callbacks added with `add_periodic_callback`
    pub periodic_interval: Duration,

    /// How long queue teardown waits for each worker thread
    pub join_timeout: Duration,

    /// Prefix of every worker and timer thread name
    pub thread_name_prefix: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            max_user_queues: 124,
            standard_concurrency: 1,
            wide_concurrency: 4,
            periodic_interval: Duration::from_millis(10),
            join_timeout: Duration::from_secs(2),
            thread_name_prefix: "rtwq".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Defaults overridden by `RTWQ_WIDE_CONCURRENCY`,
    /// `RTWQ_STANDARD_CONCURRENCY` and `RTWQ_MAX_USER_QUEUES`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_usize("RTWQ_WIDE_CONCURRENCY") {
            config.wide_concurrency = value;
        }
        if let Some(value) = env_usize("RTWQ_STANDARD_CONCURRENCY") {
            config.standard_concurrency = value;
        }
        if let Some(value) = env_usize("RTWQ_MAX_USER_QUEUES") {
            config.max_user_queues = value;
        }
        config
    }

    /// Same configuration with a different user queue capacity
    pub fn with_max_user_queues(mut self, max_user_queues: usize) -> Self {
        self.max_user_queues = max_user_queues;
        self
    }

    /// Same configuration with a different thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
