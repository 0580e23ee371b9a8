//! Statement handle

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dbcp_core::{
    BoundParam, DbcpError, ExecuteMethod, ExecuteOutcome, RawStatement, Result, StatementKey,
    StatementKind, Value,
};
use parking_lot::Mutex;

use super::connection::ConnectionHandle;
use super::cursor::{CursorHandle, CursorProxy};
use super::state::{CloseErrors, ProxyState};
use crate::cache::StatementEntry;
use crate::hooks::{ExecutionContext, ProxyTarget};

pub(crate) struct StatementProxy {
    connection: ConnectionHandle,
    key: StatementKey,
    entry: Arc<StatementEntry>,
    /// Set once the entry went back to the cache
    entry_released: AtomicBool,
    state: ProxyState,
    params: Mutex<Vec<BoundParam>>,
    cursors: Mutex<Vec<Weak<CursorProxy>>>,
}

impl StatementProxy {
    pub(crate) fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Give the entry back to the cache exactly once.
    ///
    /// Returns the raw statement when it has to be closed.
    fn release_entry(&self) -> Option<Arc<dyn RawStatement>> {
        if self.entry_released.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.connection.ctx().cache.release_entry(&self.entry)
    }
}

impl Drop for StatementProxy {
    fn drop(&mut self) {
        if self.state.is_open() {
            tracing::warn!(
                connection = %self.connection.id(),
                statement = %self.key,
                "statement dropped without close"
            );
        }
        let Some(statement) = self.release_entry() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = statement.close().await {
                    tracing::debug!(error = %e, "error closing abandoned statement");
                }
            });
        }
    }
}

/// What an execute call produced
#[derive(Debug)]
pub enum Execution {
    Rows(CursorHandle),
    Updated(u64),
}

/// A statement as seen by the application.
///
/// Closing it returns a cached statement to the cache, or closes an
/// uncached one. Clones share one statement.
#[derive(Clone)]
pub struct StatementHandle {
    inner: Arc<StatementProxy>,
}

impl StatementHandle {
    pub(super) fn new(
        connection: ConnectionHandle,
        key: StatementKey,
        entry: Arc<StatementEntry>,
    ) -> Self {
        Self {
            inner: Arc::new(StatementProxy {
                connection,
                key,
                entry,
                entry_released: AtomicBool::new(false),
                state: ProxyState::new(),
                params: Mutex::new(Vec::new()),
                cursors: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(super) fn downgrade(&self) -> Weak<StatementProxy> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(weak: &Weak<StatementProxy>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The connection that created this statement
    pub fn connection(&self) -> &ConnectionHandle {
        &self.inner.connection
    }

    pub fn key(&self) -> &StatementKey {
        &self.inner.key
    }

    pub fn kind(&self) -> StatementKind {
        self.inner.key.kind()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Whether the underlying statement lives in the statement cache
    pub fn is_cached(&self) -> bool {
        self.inner.entry.is_cached()
    }

    fn ensure_open(&self) -> Result<()> {
        self.inner.state.ensure_open("statement")?;
        self.inner.connection.ensure_open()
    }

    /// Bind `value` to the 1-based parameter `index` with the setter
    /// matching the value's type
    pub fn bind(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let setter = value.setter_name();
        self.bind_with(setter, index, value)
    }

    /// Bind with an explicit logical setter name, e.g. `set_clob`
    pub fn bind_with(&self, setter: &str, index: usize, value: Value) -> Result<()> {
        self.ensure_open()?;
        if index == 0 {
            return Err(DbcpError::Query("parameter indexes start at 1".into()));
        }
        self.inner
            .params
            .lock()
            .push(BoundParam::new(setter, index, value));
        Ok(())
    }

    pub fn clear_parameters(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.params.lock().clear();
        Ok(())
    }

    /// Binding calls recorded since the last clear, in call order
    pub fn bound_parameters(&self) -> Vec<BoundParam> {
        self.inner.params.lock().clone()
    }

    /// Execute the statement.
    ///
    /// Plain statements take their SQL here; prepared and callable
    /// statements reject it.
    pub async fn execute(&self, method: ExecuteMethod, sql: Option<&str>) -> Result<Execution> {
        self.ensure_open()?;
        let connection = &self.inner.connection;
        let ctx = connection.ctx();
        ctx.hooks
            .on_invoke(ProxyTarget::Statement, method.name())
            .await?;

        let kind = self.kind();
        let sql = match (kind, sql) {
            (StatementKind::Plain, Some(sql)) => sql.to_string(),
            (StatementKind::Plain, None) => {
                return Err(DbcpError::Query(
                    "a plain statement needs SQL text to execute".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(DbcpError::NotSupported(format!(
                    "passing SQL text to execute on a {:?} statement",
                    kind
                )));
            }
            (_, None) => self.inner.key.sql().to_string(),
        };

        let context = ExecutionContext::new(
            connection.id(),
            kind,
            method,
            sql,
            self.bound_parameters(),
            ctx.include_params,
        );
        let outcome = ctx
            .hooks
            .execute(&context, &**self.inner.entry.statement())
            .await
            .inspect_err(|e| connection.note_error(e))?;

        match outcome {
            ExecuteOutcome::Updated(count) => Ok(Execution::Updated(count)),
            ExecuteOutcome::Rows(raw) => {
                let (sql, params) = context.into_parts();
                let cursor = CursorHandle::new(self.clone(), raw, sql, params);
                if !self.register_cursor(&cursor) {
                    // The statement started closing while the call was in flight
                    if let Err(e) = cursor.close().await {
                        tracing::debug!(error = %e, "error closing cursor of a closed statement");
                    }
                    return Err(DbcpError::Closed("statement"));
                }
                Ok(Execution::Rows(cursor))
            }
        }
    }

    /// Track `cursor` for cascading close. False when the statement is no
    /// longer open; checked under the lock `close` drains.
    fn register_cursor(&self, cursor: &CursorHandle) -> bool {
        let mut cursors = self.inner.cursors.lock();
        cursors.retain(|c| c.strong_count() > 0);
        cursors.push(cursor.downgrade());
        self.inner.state.is_open()
    }

    /// Execute a prepared or callable statement expecting rows
    pub async fn execute_query(&self) -> Result<CursorHandle> {
        let execution = self.execute(ExecuteMethod::ExecuteQuery, None).await?;
        expect_rows(execution)
    }

    /// Execute a prepared or callable statement expecting an update count
    pub async fn execute_update(&self) -> Result<u64> {
        let execution = self.execute(ExecuteMethod::ExecuteUpdate, None).await?;
        expect_count(execution).await
    }

    /// Execute SQL on a plain statement expecting rows
    pub async fn execute_query_sql(&self, sql: &str) -> Result<CursorHandle> {
        let execution = self.execute(ExecuteMethod::ExecuteQuery, Some(sql)).await?;
        expect_rows(execution)
    }

    /// Execute SQL on a plain statement expecting an update count
    pub async fn execute_update_sql(&self, sql: &str) -> Result<u64> {
        let execution = self.execute(ExecuteMethod::ExecuteUpdate, Some(sql)).await?;
        expect_count(execution).await
    }

    /// Close open cursors and release the statement.
    ///
    /// Only the first call does any work; failures are aggregated.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.state.begin_close() {
            return Ok(());
        }
        let mut errors = CloseErrors::default();
        errors.record(
            inner
                .connection
                .ctx()
                .hooks
                .on_invoke(ProxyTarget::Statement, "close")
                .await,
        );

        let cursors: Vec<_> = inner.cursors.lock().drain(..).collect();
        for cursor in cursors.iter().filter_map(CursorHandle::upgrade) {
            errors.record(cursor.close().await);
        }

        if let Some(statement) = inner.release_entry() {
            errors.record(statement.close().await);
        }

        inner.state.finish_close();
        errors.into_result()
    }
}

fn expect_rows(execution: Execution) -> Result<CursorHandle> {
    match execution {
        Execution::Rows(cursor) => Ok(cursor),
        Execution::Updated(_) => Err(DbcpError::Query(
            "statement did not produce a result set".into(),
        )),
    }
}

async fn expect_count(execution: Execution) -> Result<u64> {
    match execution {
        Execution::Updated(count) => Ok(count),
        Execution::Rows(cursor) => {
            cursor.close().await?;
            Err(DbcpError::Query(
                "statement produced a result set instead of an update count".into(),
            ))
        }
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("key", &self.inner.key)
            .field("cached", &self.is_cached())
            .field("closed", &self.is_closed())
            .finish()
    }
}
