//! Data source configuration
//!
//! Field names serialize to the camelCase option names operators already
//! know (`poolInitialSize`, `statementCacheMaxSize`, ...), so a TOML or JSON
//! document maps onto this struct directly.

use std::time::Duration;

use dbcp_core::{ConnectOptions, DbcpError, RawConnection, Result, TransactionIsolation};
use serde::{Deserialize, Serialize};

use crate::pool::Wait;

/// Upper bound for `statementCacheMaxSize`
pub const STATEMENT_CACHE_MAX_SIZE: usize = 1000;

/// Complete configuration of a [`DataSource`](crate::DataSource)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbcpConfig {
    /// Name used in log records
    pub pool_name: String,

    pub driver_name: String,
    /// Driver-specific connection string
    pub url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Connections created eagerly on start; the reducer never shrinks below this
    pub pool_initial_size: usize,
    pub pool_max_size: usize,
    /// Serve waiters strictly in arrival order
    pub pool_fair: bool,
    /// Keep a backtrace of where each taken connection was acquired
    pub pool_enable_connection_tracking: bool,

    /// Idle time after which a connection is validated before being handed
    /// out. `0` validates every time, negative never validates.
    pub connection_idle_limit_in_seconds: i64,
    pub test_connection_query: String,
    pub validate_timeout_in_seconds: u64,

    /// Reducer period; `0` disables the reducer
    pub reducer_time_interval_in_seconds: u64,
    pub reducer_samples: u32,

    /// Default wait for `acquire_connection`; `0` waits forever
    pub create_connection_timeout_in_ms: u64,
    pub acquire_retry_delay_in_ms: u64,
    pub acquire_retry_attempts: u32,

    /// `0` disables statement caching
    pub statement_cache_max_size: usize,

    /// Acquires taking at least this long are logged; `0` logs all, negative disables
    pub log_create_connection_longer_than_ms: i64,
    pub log_stack_trace_for_long_create_connection: bool,
    /// Execute calls taking at least this long are logged; `0` logs all, negative disables
    pub log_query_execution_longer_than_ms: i64,
    pub log_stack_trace_for_long_query_execution: bool,
    /// Result cursors yielding at least this many rows are logged; negative disables
    pub log_large_result_set: i64,
    pub log_stack_trace_for_large_result_set: bool,
    /// Pass bound parameters to execution and retrieval hooks
    pub include_query_parameters: bool,

    /// Restore the default attributes below whenever a connection is returned
    pub reset_defaults_after_use: bool,
    pub default_auto_commit: Option<bool>,
    pub default_read_only: Option<bool>,
    pub default_transaction_isolation: Option<TransactionIsolation>,
    pub default_catalog: Option<String>,
}

impl Default for DbcpConfig {
    fn default() -> Self {
        Self {
            pool_name: "dbcp".to_string(),
            driver_name: String::new(),
            url: String::new(),
            username: None,
            password: None,
            pool_initial_size: 10,
            pool_max_size: 100,
            pool_fair: true,
            pool_enable_connection_tracking: false,
            connection_idle_limit_in_seconds: 60,
            test_connection_query: "SELECT 1".to_string(),
            validate_timeout_in_seconds: 3,
            reducer_time_interval_in_seconds: 60,
            reducer_samples: 20,
            create_connection_timeout_in_ms: 30_000,
            acquire_retry_delay_in_ms: 1000,
            acquire_retry_attempts: 3,
            statement_cache_max_size: 0,
            log_create_connection_longer_than_ms: 3000,
            log_stack_trace_for_long_create_connection: false,
            log_query_execution_longer_than_ms: 3000,
            log_stack_trace_for_long_query_execution: false,
            log_large_result_set: -1,
            log_stack_trace_for_large_result_set: false,
            include_query_parameters: false,
            reset_defaults_after_use: false,
            default_auto_commit: None,
            default_read_only: None,
            default_transaction_isolation: None,
            default_catalog: None,
        }
    }
}

impl DbcpConfig {
    /// Create a configuration for the given driver and connection string
    pub fn new(driver_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document, then validate it
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_pool_size(mut self, initial: usize, max: usize) -> Self {
        self.pool_initial_size = initial;
        self.pool_max_size = max;
        self
    }

    pub fn with_fair(mut self, fair: bool) -> Self {
        self.pool_fair = fair;
        self
    }

    pub fn with_statement_cache(mut self, max_size: usize) -> Self {
        self.statement_cache_max_size = max_size;
        self
    }

    pub fn with_idle_limit_secs(mut self, seconds: i64) -> Self {
        self.connection_idle_limit_in_seconds = seconds;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.acquire_retry_attempts = attempts;
        self.acquire_retry_delay_in_ms = delay_ms;
        self
    }

    pub fn with_reducer(mut self, interval_secs: u64, samples: u32) -> Self {
        self.reducer_time_interval_in_seconds = interval_secs;
        self.reducer_samples = samples;
        self
    }

    pub fn with_create_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.create_connection_timeout_in_ms = timeout_ms;
        self
    }

    /// Reject combinations the pool cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.pool_max_size == 0 {
            return Err(DbcpError::Configuration(
                "poolMaxSize must be greater than 0".into(),
            ));
        }
        if self.pool_initial_size > self.pool_max_size {
            return Err(DbcpError::Configuration(format!(
                "poolInitialSize ({}) cannot exceed poolMaxSize ({})",
                self.pool_initial_size, self.pool_max_size
            )));
        }
        if self.statement_cache_max_size > STATEMENT_CACHE_MAX_SIZE {
            return Err(DbcpError::Configuration(format!(
                "statementCacheMaxSize ({}) cannot exceed {}",
                self.statement_cache_max_size, STATEMENT_CACHE_MAX_SIZE
            )));
        }
        if self.reducer_time_interval_in_seconds > 0 && self.reducer_samples == 0 {
            return Err(DbcpError::Configuration(
                "reducerSamples must be greater than 0 when the reducer is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            driver: self.driver_name.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Wait used by `acquire_connection` when the caller does not pass one
    pub fn acquire_wait(&self) -> Wait {
        Wait::from_millis(self.create_connection_timeout_in_ms)
    }

    pub fn connection_defaults(&self) -> ConnectionDefaults {
        ConnectionDefaults {
            auto_commit: self.default_auto_commit,
            read_only: self.default_read_only,
            transaction_isolation: self.default_transaction_isolation,
            catalog: self.default_catalog.clone(),
        }
    }

    pub fn slow_acquire_threshold(&self) -> Option<Duration> {
        threshold_ms(self.log_create_connection_longer_than_ms)
    }

    pub fn slow_query_threshold(&self) -> Option<Duration> {
        threshold_ms(self.log_query_execution_longer_than_ms)
    }

    pub fn large_result_set_threshold(&self) -> Option<u64> {
        u64::try_from(self.log_large_result_set).ok()
    }
}

/// Negative values disable a threshold
fn threshold_ms(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().map(Duration::from_millis)
}

/// Connection attributes applied to new connections and, optionally,
/// restored after each use
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionDefaults {
    pub auto_commit: Option<bool>,
    pub read_only: Option<bool>,
    pub transaction_isolation: Option<TransactionIsolation>,
    pub catalog: Option<String>,
}

impl ConnectionDefaults {
    pub fn is_empty(&self) -> bool {
        self.auto_commit.is_none()
            && self.read_only.is_none()
            && self.transaction_isolation.is_none()
            && self.catalog.is_none()
    }

    /// Apply every configured attribute; stops at the first failure
    pub async fn apply(&self, raw: &dyn RawConnection) -> Result<()> {
        if let Some(auto_commit) = self.auto_commit {
            raw.set_auto_commit(auto_commit).await?;
        }
        if let Some(read_only) = self.read_only {
            raw.set_read_only(read_only).await?;
        }
        if let Some(isolation) = self.transaction_isolation {
            raw.set_transaction_isolation(isolation).await?;
        }
        if let Some(catalog) = &self.catalog {
            raw.set_catalog(catalog).await?;
        }
        Ok(())
    }

    /// Apply every configured attribute, collecting each failure instead of stopping
    pub async fn reset(&self, raw: &dyn RawConnection) -> Vec<DbcpError> {
        let mut errors = Vec::new();
        if let Some(auto_commit) = self.auto_commit {
            if let Err(e) = raw.set_auto_commit(auto_commit).await {
                errors.push(e);
            }
        }
        if let Some(read_only) = self.read_only {
            if let Err(e) = raw.set_read_only(read_only).await {
                errors.push(e);
            }
        }
        if let Some(isolation) = self.transaction_isolation {
            if let Err(e) = raw.set_transaction_isolation(isolation).await {
                errors.push(e);
            }
        }
        if let Some(catalog) = &self.catalog {
            if let Err(e) = raw.set_catalog(catalog).await {
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DbcpConfig::default();
        assert_eq!(config.pool_initial_size, 10);
        assert_eq!(config.pool_max_size, 100);
        assert!(config.pool_fair);
        assert_eq!(config.connection_idle_limit_in_seconds, 60);
        assert_eq!(config.acquire_retry_attempts, 3);
        assert_eq!(config.statement_cache_max_size, 0);
        assert_eq!(config.acquire_wait(), Wait::For(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_uses_option_names() {
        let config = DbcpConfig::from_toml_str(indoc! {r#"
            driverName = "postgresql"
            url = "postgres://localhost/app"
            poolInitialSize = 2
            poolMaxSize = 8
            poolFair = false
            statementCacheMaxSize = 50
            connectionIdleLimitInSeconds = -1
            createConnectionTimeoutInMs = 0
            resetDefaultsAfterUse = true
            defaultTransactionIsolation = "READ_COMMITTED"
        "#})
        .expect("parse config");

        assert_eq!(config.driver_name, "postgresql");
        assert_eq!(config.pool_initial_size, 2);
        assert_eq!(config.pool_max_size, 8);
        assert!(!config.pool_fair);
        assert_eq!(config.statement_cache_max_size, 50);
        assert_eq!(config.acquire_wait(), Wait::Forever);
        assert_eq!(
            config.connection_defaults().transaction_isolation,
            Some(TransactionIsolation::ReadCommitted)
        );
        // Unspecified options keep their defaults
        assert_eq!(config.reducer_samples, 20);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let err = DbcpConfig::default().with_pool_size(5, 2).validate();
        assert!(matches!(err, Err(DbcpError::Configuration(_))));

        let err = DbcpConfig::default().with_pool_size(0, 0).validate();
        assert!(matches!(err, Err(DbcpError::Configuration(_))));

        let err = DbcpConfig::default()
            .with_statement_cache(STATEMENT_CACHE_MAX_SIZE + 1)
            .validate();
        assert!(matches!(err, Err(DbcpError::Configuration(_))));

        let err = DbcpConfig::default().with_reducer(10, 0).validate();
        assert!(matches!(err, Err(DbcpError::Configuration(_))));
    }

    #[test]
    fn test_negative_thresholds_disable_logging() {
        let mut config = DbcpConfig::default();
        config.log_query_execution_longer_than_ms = -1;
        config.log_create_connection_longer_than_ms = 0;
        assert_eq!(config.slow_query_threshold(), None);
        assert_eq!(config.slow_acquire_threshold(), Some(Duration::ZERO));
        assert_eq!(config.large_result_set_threshold(), None);
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = DbcpConfig::new("mock", "mock://").with_credentials("app", "secret");
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("\"username\":\"app\""));
        assert!(!json.contains("secret"));
    }
}
