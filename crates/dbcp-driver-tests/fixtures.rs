//! Test fixtures: a scripted in-memory driver and data source helpers.
//!
//! [`ScriptedDriver`] implements the raw connector traits entirely in
//! memory. Result sets are registered per SQL text, connect attempts can be
//! made to fail or to take time, and every physical call is counted in
//! [`DriverStats`] so tests can assert what actually reached the "database".
//!
//! SQL conventions understood by the scripted statements:
//!
//! - text registered with [`ScriptedDriver::with_result`] yields those rows
//! - text containing `error` fails with a query error
//! - text containing `disconnect` fails with a connection error
//! - anything else is an update affecting one row
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbcp_driver_tests::fixtures::{ScriptedDriver, test_config, test_data_source};
//!
//! let driver = ScriptedDriver::new().with_result("select id from users", vec![vec![1.into()]]);
//! let (ds, driver) = test_data_source(test_config(1, 4), driver)?;
//! let conn = ds.acquire_connection().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dbcp_core::{
    BoundParam, ConnectOptions, Connector, DbcpError, ExecuteMethod, ExecuteOutcome,
    RawConnection, RawCursor, RawStatement, Row, StatementKey, TransactionIsolation, Value,
};
use dbcp_pool::{DataSource, DbcpConfig};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output is captured by the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Acquire ordering under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fairness {
    /// Waiters served in arrival order
    Fair,
    /// Any waiter may win a released connection
    Unfair,
}

impl Fairness {
    /// Whether the pool should run in fair mode
    pub fn is_fair(&self) -> bool {
        matches!(self, Fairness::Fair)
    }
}

/// Base configuration for scenario tests: no reducer, fast retries and
/// logging hooks disabled
pub fn test_config(initial: usize, max: usize) -> DbcpConfig {
    let mut config = DbcpConfig::new("scripted", "scripted://memory")
        .with_pool_size(initial, max)
        .with_retry(0, 10)
        .with_reducer(0, 1)
        .with_create_timeout_ms(5_000);
    config.log_create_connection_longer_than_ms = -1;
    config.log_query_execution_longer_than_ms = -1;
    config
}

/// Build a data source over `driver`, returning the driver's shared handle
pub fn test_data_source(
    config: DbcpConfig,
    driver: ScriptedDriver,
) -> Result<(DataSource, Arc<ScriptedDriver>)> {
    init_tracing();
    let driver = Arc::new(driver);
    let data_source =
        DataSource::new(config, driver.clone()).context("failed to build data source")?;
    Ok((data_source, driver))
}

/// Counts of physical calls made through the scripted driver
#[derive(Debug, Default)]
pub struct DriverStats {
    connects: AtomicUsize,
    closes: AtomicUsize,
    validations: AtomicUsize,
    prepares: AtomicUsize,
    statement_closes: AtomicUsize,
    executions: AtomicUsize,
    cursor_closes: AtomicUsize,
    prepared_sql: Mutex<Vec<String>>,
}

impl DriverStats {
    /// Connect attempts, failed ones included
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Physical connections closed
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Connection validity checks
    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    /// Statements prepared by the driver
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    /// Physical statements closed
    pub fn statement_closes(&self) -> usize {
        self.statement_closes.load(Ordering::SeqCst)
    }

    /// Execute calls that reached a statement
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Result cursors closed
    pub fn cursor_closes(&self) -> usize {
        self.cursor_closes.load(Ordering::SeqCst)
    }

    /// SQL text of every prepare call, in call order
    pub fn prepared_sql(&self) -> Vec<String> {
        self.prepared_sql.lock().clone()
    }
}

/// In-memory [`Connector`] with scripted results and failures
pub struct ScriptedDriver {
    stats: Arc<DriverStats>,
    failing_connects: AtomicUsize,
    connect_delay: Duration,
    results: Arc<HashMap<String, Vec<Row>>>,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    /// A driver whose connects always succeed at once
    pub fn new() -> Self {
        Self {
            stats: Arc::new(DriverStats::default()),
            failing_connects: AtomicUsize::new(0),
            connect_delay: Duration::ZERO,
            results: Arc::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Refuse the next `count` connect attempts
    pub fn with_failing_connects(self, count: usize) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    /// Make every connect attempt take `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Register the rows returned for `sql`; columns are named `c1`, `c2`, ...
    pub fn with_result(mut self, sql: &str, rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| {
                let columns = (1..=values.len()).map(|i| format!("c{i}")).collect();
                Row::new(columns, values)
            })
            .collect();
        Arc::make_mut(&mut self.results).insert(sql.to_string(), rows);
        self
    }

    /// Shared call counters
    pub fn stats(&self) -> &Arc<DriverStats> {
        &self.stats
    }

    /// Refuse the next `count` connect attempts from now on
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Every connection opened so far, in creation order
    pub fn connections(&self) -> Vec<Arc<ScriptedConnection>> {
        self.connections.lock().clone()
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl Connector for ScriptedDriver {
    fn driver_name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, options: &ConnectOptions) -> dbcp_core::Result<Arc<dyn RawConnection>> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let refused = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DbcpError::Connection(format!(
                "connection to {} refused",
                options.url
            )));
        }

        let connection = Arc::new(ScriptedConnection {
            stats: self.stats.clone(),
            results: self.results.clone(),
            valid: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            attributes: Mutex::new(ConnectionAttributes::default()),
        });
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Session attributes last set on a scripted connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionAttributes {
    /// Last `set_auto_commit` value
    pub auto_commit: Option<bool>,
    /// Last `set_read_only` value
    pub read_only: Option<bool>,
    /// Last `set_transaction_isolation` value
    pub isolation: Option<TransactionIsolation>,
    /// Last `set_catalog` value
    pub catalog: Option<String>,
}

/// One in-memory physical connection
pub struct ScriptedConnection {
    stats: Arc<DriverStats>,
    results: Arc<HashMap<String, Vec<Row>>>,
    valid: AtomicBool,
    closed: AtomicBool,
    attributes: Mutex<ConnectionAttributes>,
}

impl ScriptedConnection {
    /// Make validity checks report this connection as broken
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Current session attributes
    pub fn attributes(&self) -> ConnectionAttributes {
        self.attributes.lock().clone()
    }

    fn ensure_open(&self) -> dbcp_core::Result<()> {
        if self.is_closed() {
            Err(DbcpError::Connection("connection is closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RawConnection for ScriptedConnection {
    async fn is_valid(&self, _test_query: &str) -> dbcp_core::Result<bool> {
        self.stats.validations.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid.load(Ordering::SeqCst) && !self.is_closed())
    }

    async fn prepare(&self, key: &StatementKey) -> dbcp_core::Result<Arc<dyn RawStatement>> {
        self.ensure_open()?;
        self.stats.prepares.fetch_add(1, Ordering::SeqCst);
        self.stats.prepared_sql.lock().push(key.sql().to_string());
        Ok(Arc::new(ScriptedStatement {
            sql: key.sql().to_string(),
            stats: self.stats.clone(),
            results: self.results.clone(),
        }))
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> dbcp_core::Result<()> {
        self.ensure_open()?;
        self.attributes.lock().auto_commit = Some(auto_commit);
        Ok(())
    }

    async fn set_read_only(&self, read_only: bool) -> dbcp_core::Result<()> {
        self.ensure_open()?;
        self.attributes.lock().read_only = Some(read_only);
        Ok(())
    }

    async fn set_transaction_isolation(
        &self,
        isolation: TransactionIsolation,
    ) -> dbcp_core::Result<()> {
        self.ensure_open()?;
        self.attributes.lock().isolation = Some(isolation);
        Ok(())
    }

    async fn set_catalog(&self, catalog: &str) -> dbcp_core::Result<()> {
        self.ensure_open()?;
        self.attributes.lock().catalog = Some(catalog.to_string());
        Ok(())
    }

    async fn commit(&self) -> dbcp_core::Result<()> {
        self.ensure_open()
    }

    async fn rollback(&self) -> dbcp_core::Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> dbcp_core::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedStatement {
    sql: String,
    stats: Arc<DriverStats>,
    results: Arc<HashMap<String, Vec<Row>>>,
}

#[async_trait]
impl RawStatement for ScriptedStatement {
    async fn execute(
        &self,
        method: ExecuteMethod,
        sql: Option<&str>,
        params: &[BoundParam],
    ) -> dbcp_core::Result<ExecuteOutcome> {
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        let text = sql.unwrap_or(&self.sql);
        if text.contains("disconnect") {
            return Err(DbcpError::Connection("server closed the connection".into()));
        }
        if text.contains("error") {
            return Err(DbcpError::Query(format!("syntax error in {text:?}")));
        }

        match (self.results.get(text), method) {
            (Some(rows), ExecuteMethod::Execute | ExecuteMethod::ExecuteQuery) => {
                Ok(ExecuteOutcome::Rows(Box::new(ScriptedCursor {
                    rows: rows.clone().into_iter(),
                    stats: self.stats.clone(),
                })))
            }
            (None, ExecuteMethod::ExecuteQuery) => Err(DbcpError::Query(format!(
                "no result set scripted for {text:?}"
            ))),
            _ => Ok(ExecuteOutcome::Updated(params.len().max(1) as u64)),
        }
    }

    async fn close(&self) -> dbcp_core::Result<()> {
        self.stats.statement_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedCursor {
    rows: std::vec::IntoIter<Row>,
    stats: Arc<DriverStats>,
}

#[async_trait]
impl RawCursor for ScriptedCursor {
    async fn next(&mut self) -> dbcp_core::Result<Option<Row>> {
        Ok(self.rows.next())
    }

    async fn close(&mut self) -> dbcp_core::Result<()> {
        self.stats.cursor_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
