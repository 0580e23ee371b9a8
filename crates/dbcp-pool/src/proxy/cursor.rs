//! Result cursor handle

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dbcp_core::{BoundParam, DbcpError, RawCursor, Result, Row};

use super::state::{CloseErrors, ProxyState};
use super::statement::StatementHandle;
use crate::hooks::ProxyTarget;

pub(crate) struct CursorProxy {
    statement: StatementHandle,
    /// `None` once the raw cursor was closed
    raw: tokio::sync::Mutex<Option<Box<dyn RawCursor>>>,
    state: ProxyState,
    rows: AtomicU64,
    sql: String,
    params: Vec<BoundParam>,
}

impl Drop for CursorProxy {
    fn drop(&mut self) {
        let Some(mut raw) = self.raw.get_mut().take() else {
            return;
        };
        tracing::warn!(sql = %self.sql, "result cursor dropped without close");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = raw.close().await {
                    tracing::debug!(error = %e, "error closing abandoned cursor");
                }
            });
        }
    }
}

/// The rows produced by one execute call.
///
/// Counts the rows it yields; closing it reports that count to the result
/// set retrieval hooks.
pub struct CursorHandle {
    inner: Arc<CursorProxy>,
}

impl CursorHandle {
    pub(super) fn new(
        statement: StatementHandle,
        raw: Box<dyn RawCursor>,
        sql: String,
        params: Vec<BoundParam>,
    ) -> Self {
        Self {
            inner: Arc::new(CursorProxy {
                statement,
                raw: tokio::sync::Mutex::new(Some(raw)),
                state: ProxyState::new(),
                rows: AtomicU64::new(0),
                sql,
                params,
            }),
        }
    }

    pub(super) fn downgrade(&self) -> Weak<CursorProxy> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(weak: &Weak<CursorProxy>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The statement that produced this cursor
    pub fn statement(&self) -> &StatementHandle {
        &self.inner.statement
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Rows returned by `next` so far
    pub fn rows_read(&self) -> u64 {
        self.inner.rows.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    pub async fn next(&self) -> Result<Option<Row>> {
        let inner = &self.inner;
        inner.state.ensure_open("result cursor")?;
        let connection = inner.statement.connection();
        connection
            .ctx()
            .hooks
            .on_invoke(ProxyTarget::Cursor, "next")
            .await?;

        let mut raw = inner.raw.lock().await;
        let Some(cursor) = raw.as_mut() else {
            return Err(DbcpError::Closed("result cursor"));
        };
        let row = cursor
            .next()
            .await
            .inspect_err(|e| connection.note_error(e))?;
        if row.is_some() {
            inner.rows.fetch_add(1, Ordering::SeqCst);
        }
        Ok(row)
    }

    /// Read every remaining row
    pub async fn fetch_all(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the raw cursor, then report the result size to the retrieval
    /// hooks. Only the first call does any work.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.state.begin_close() {
            return Ok(());
        }
        let ctx = inner.statement.connection().ctx();
        let mut errors = CloseErrors::default();

        errors.record(ctx.hooks.on_invoke(ProxyTarget::Cursor, "close").await);

        let raw = inner.raw.lock().await.take();
        if let Some(mut raw) = raw {
            errors.record(raw.close().await);
        }

        let params = ctx.include_params.then_some(inner.params.as_slice());
        errors.record(
            ctx.hooks
                .on_retrieved(&inner.sql, params, self.rows_read())
                .await,
        );

        inner.state.finish_close();
        errors.into_result()
    }
}

impl fmt::Debug for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorHandle")
            .field("sql", &self.inner.sql)
            .field("rows_read", &self.rows_read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
