//! Engine configuration

use std::time::Duration;

use dbcp_core::ConnectOptions;

use super::ValidationPolicy;
use crate::config::{ConnectionDefaults, DbcpConfig};
use crate::retry::BackoffStrategy;

/// Settings the pool engine works from.
///
/// Usually derived from a [`DbcpConfig`]; the builder methods exist for
/// embedding the engine directly.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) name: String,
    pub(crate) initial_size: usize,
    pub(crate) max_size: usize,
    pub(crate) fair: bool,
    pub(crate) tracking: bool,
    pub(crate) validation: ValidationPolicy,
    pub(crate) test_query: String,
    pub(crate) validate_timeout: Duration,
    /// `None` disables the reducer
    pub(crate) reducer_interval: Option<Duration>,
    pub(crate) reducer_samples: u32,
    pub(crate) retry_attempts: u32,
    pub(crate) backoff: BackoffStrategy,
    pub(crate) connect_options: ConnectOptions,
    pub(crate) defaults: ConnectionDefaults,
}

impl PoolConfig {
    /// # Panics
    ///
    /// Panics if `max_size` is 0 or `initial_size > max_size`.
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        assert!(max_size > 0, "max_size must be greater than 0");
        assert!(
            initial_size <= max_size,
            "initial_size ({}) cannot exceed max_size ({})",
            initial_size,
            max_size
        );

        Self {
            name: "dbcp".to_string(),
            initial_size,
            max_size,
            fair: true,
            tracking: false,
            validation: ValidationPolicy::default(),
            test_query: "SELECT 1".to_string(),
            validate_timeout: Duration::from_secs(3),
            reducer_interval: None,
            reducer_samples: 20,
            retry_attempts: 3,
            backoff: BackoffStrategy::default(),
            connect_options: ConnectOptions::default(),
            defaults: ConnectionDefaults::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fair(mut self, fair: bool) -> Self {
        self.fair = fair;
        self
    }

    pub fn with_tracking(mut self, tracking: bool) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_idle_limit_secs(mut self, seconds: i64) -> Self {
        self.validation = ValidationPolicy::from_idle_limit_secs(seconds);
        self
    }

    pub fn with_reducer(mut self, interval: Duration, samples: u32) -> Self {
        self.reducer_interval = Some(interval);
        self.reducer_samples = samples.max(1);
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: BackoffStrategy) -> Self {
        self.retry_attempts = attempts;
        self.backoff = backoff;
        self
    }

    pub fn with_defaults(mut self, defaults: ConnectionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_fair(&self) -> bool {
        self.fair
    }

    pub fn validation(&self) -> ValidationPolicy {
        self.validation
    }

    pub fn reducer_interval(&self) -> Option<Duration> {
        self.reducer_interval
    }
}

impl From<&DbcpConfig> for PoolConfig {
    fn from(config: &DbcpConfig) -> Self {
        let reducer_interval = (config.reducer_time_interval_in_seconds > 0)
            .then(|| Duration::from_secs(config.reducer_time_interval_in_seconds));

        Self {
            name: config.pool_name.clone(),
            initial_size: config.pool_initial_size,
            max_size: config.pool_max_size,
            fair: config.pool_fair,
            tracking: config.pool_enable_connection_tracking,
            validation: ValidationPolicy::from_idle_limit_secs(
                config.connection_idle_limit_in_seconds,
            ),
            test_query: config.test_connection_query.clone(),
            validate_timeout: Duration::from_secs(config.validate_timeout_in_seconds),
            reducer_interval,
            reducer_samples: config.reducer_samples.max(1),
            retry_attempts: config.acquire_retry_attempts,
            backoff: BackoffStrategy::constant(config.acquire_retry_delay_in_ms),
            connect_options: config.connect_options(),
            defaults: config.connection_defaults(),
        }
    }
}
