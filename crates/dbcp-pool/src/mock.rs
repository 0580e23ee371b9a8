//! In-memory driver used by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dbcp_core::{
    BoundParam, ConnectOptions, Connector, DbcpError, ExecuteMethod, ExecuteOutcome,
    RawConnection, RawCursor, RawStatement, Result, Row, StatementKey, TransactionIsolation,
    Value,
};
use parking_lot::Mutex;

/// Physical calls observed by the mock driver
#[derive(Default)]
pub(crate) struct Counters {
    pub connects: AtomicUsize,
    pub raw_closes: AtomicUsize,
    pub validations: AtomicUsize,
    pub prepares: AtomicUsize,
    pub statement_closes: AtomicUsize,
    pub executions: AtomicUsize,
    pub cursor_closes: AtomicUsize,
    pub attribute_calls: Mutex<Vec<String>>,
    /// Parameters handed to each execute call
    pub executed_params: Mutex<Vec<Vec<BoundParam>>>,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockConnector {
    counters: Arc<Counters>,
    fail_connects: AtomicUsize,
    fail_attributes: AtomicBool,
    rows_per_query: AtomicUsize,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            fail_connects: AtomicUsize::new(0),
            fail_attributes: AtomicBool::new(false),
            rows_per_query: AtomicUsize::new(3),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn connect_calls(&self) -> usize {
        Counters::get(&self.counters.connects)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_attribute_calls(&self, fail: bool) {
        self.fail_attributes.store(fail, Ordering::SeqCst);
    }

    pub fn set_rows_per_query(&self, rows: usize) {
        self.rows_per_query.store(rows, Ordering::SeqCst);
    }

    /// Every connection opened so far, in creation order
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _options: &ConnectOptions) -> Result<Arc<dyn RawConnection>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DbcpError::Connection("mock connect refused".into()));
        }

        let connection = Arc::new(MockConnection {
            id: self.connections.lock().len() + 1,
            counters: self.counters.clone(),
            closed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            fail_attributes: self.fail_attributes.load(Ordering::SeqCst),
            rows: self.rows_per_query.load(Ordering::SeqCst),
        });
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

pub(crate) struct MockConnection {
    pub id: usize,
    counters: Arc<Counters>,
    closed: AtomicBool,
    valid: AtomicBool,
    fail_attributes: bool,
    rows: usize,
}

impl MockConnection {
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    fn record(&self, call: String) -> Result<()> {
        self.counters.attribute_calls.lock().push(call);
        if self.fail_attributes {
            Err(DbcpError::Driver("mock attribute change rejected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RawConnection for MockConnection {
    async fn is_valid(&self, _test_query: &str) -> Result<bool> {
        self.counters.validations.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid.load(Ordering::SeqCst) && !self.is_closed())
    }

    async fn prepare(&self, key: &StatementKey) -> Result<Arc<dyn RawStatement>> {
        if self.is_closed() {
            return Err(DbcpError::Connection("connection is closed".into()));
        }
        self.counters.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockStatement {
            sql: key.sql().to_string(),
            counters: self.counters.clone(),
            rows: self.rows,
        }))
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.record(format!("auto_commit={auto_commit}"))
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.record(format!("read_only={read_only}"))
    }

    async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()> {
        self.record(format!("isolation={isolation}"))
    }

    async fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.record(format!("catalog={catalog}"))
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.counters.raw_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Fails with a query error when the SQL contains "fail" and with a
/// connection error when it contains "broken"
pub(crate) struct MockStatement {
    sql: String,
    counters: Arc<Counters>,
    rows: usize,
}

#[async_trait]
impl RawStatement for MockStatement {
    async fn execute(
        &self,
        method: ExecuteMethod,
        sql: Option<&str>,
        params: &[BoundParam],
    ) -> Result<ExecuteOutcome> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        self.counters.executed_params.lock().push(params.to_vec());
        let text = sql.unwrap_or(&self.sql);
        if text.contains("broken") {
            return Err(DbcpError::Connection("mock connection lost".into()));
        }
        if text.contains("fail") {
            return Err(DbcpError::Query("mock query failed".into()));
        }

        let is_query = match method {
            ExecuteMethod::ExecuteQuery => true,
            ExecuteMethod::ExecuteUpdate => false,
            ExecuteMethod::Execute => text.trim_start().to_lowercase().starts_with("select"),
        };
        if is_query {
            Ok(ExecuteOutcome::Rows(Box::new(MockCursor {
                next: 0,
                rows: self.rows,
                counters: self.counters.clone(),
            })))
        } else {
            Ok(ExecuteOutcome::Updated(1))
        }
    }

    async fn close(&self) -> Result<()> {
        self.counters.statement_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct MockCursor {
    next: usize,
    rows: usize,
    counters: Arc<Counters>,
}

#[async_trait]
impl RawCursor for MockCursor {
    async fn next(&mut self) -> Result<Option<Row>> {
        if self.next >= self.rows {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(Row::new(
            vec!["n".to_string()],
            vec![Value::Int64(self.next as i64)],
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.counters.cursor_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
