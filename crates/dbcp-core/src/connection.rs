//! Raw connector traits implemented by database drivers
//!
//! The pool never talks to a database directly. A driver supplies a
//! [`Connector`] that opens physical connections, and each connection
//! produces statements and result cursors through these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    BoundParam, ExecuteMethod, Result, Row, StatementKey, TransactionIsolation,
};

/// Parameters needed to open one physical connection
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Driver identity, e.g. "postgresql"
    pub driver: String,
    /// Driver-specific connection string
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectOptions {
    pub fn new(driver: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            username: None,
            password: None,
        }
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
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Opens physical database connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Open a new physical connection
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn RawConnection>>;
}

#[async_trait]
impl<T: Connector> Connector for Arc<T> {
    fn driver_name(&self) -> &str {
        (**self).driver_name()
    }

    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn RawConnection>> {
        (**self).connect(options).await
    }
}

/// One physical database connection
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Liveness check.
    ///
    /// `Ok(false)` means the connection is unusable; an `Err` is treated the
    /// same way by the pool.
    async fn is_valid(&self, test_query: &str) -> Result<bool>;

    /// Create a statement for the given creation call
    async fn prepare(&self, key: &StatementKey) -> Result<Arc<dyn RawStatement>>;

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    async fn set_read_only(&self, read_only: bool) -> Result<()>;

    async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()>;

    async fn set_catalog(&self, catalog: &str) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Close the physical connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A statement created on a raw connection
#[async_trait]
pub trait RawStatement: Send + Sync {
    /// Execute the statement.
    ///
    /// `sql` is only present for plain statements, whose SQL text arrives
    /// with each execute call. `params` are the bound parameters in call order.
    async fn execute(
        &self,
        method: ExecuteMethod,
        sql: Option<&str>,
        params: &[BoundParam],
    ) -> Result<ExecuteOutcome>;

    /// Close/deallocate the statement
    async fn close(&self) -> Result<()>;
}

/// A streaming result produced by executing a statement
#[async_trait]
pub trait RawCursor: Send {
    /// Advance to the next row; `None` once exhausted
    async fn next(&mut self) -> Result<Option<Row>>;

    async fn close(&mut self) -> Result<()>;
}

/// What an execute call produced
pub enum ExecuteOutcome {
    Rows(Box<dyn RawCursor>),
    Updated(u64),
}

impl fmt::Debug for ExecuteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteOutcome::Rows(_) => f.write_str("Rows(..)"),
            ExecuteOutcome::Updated(count) => f.debug_tuple("Updated").field(count).finish(),
        }
    }
}
