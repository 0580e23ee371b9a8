//! Connection handle

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dbcp_core::{
    ConnectionId, DbcpError, PrepareArg, RawConnection, Result, StatementKey,
    TransactionIsolation,
};
use parking_lot::Mutex;

use super::context::ProxyContext;
use super::state::{CloseErrors, ProxyState};
use super::statement::{StatementHandle, StatementProxy};
use crate::hooks::ProxyTarget;
use crate::pool::PooledConnection;

pub(crate) struct ConnectionProxy {
    id: ConnectionId,
    raw: Arc<dyn RawConnection>,
    /// `None` once the connection went back to the pool
    pooled: Mutex<Option<PooledConnection>>,
    state: ProxyState,
    pub(super) ctx: Arc<ProxyContext>,
    statements: Mutex<Vec<Weak<StatementProxy>>>,
    /// A fatal error was seen; destroy instead of restoring
    invalidated: AtomicBool,
}

impl Drop for ConnectionProxy {
    fn drop(&mut self) {
        let Some(pooled) = self.pooled.get_mut().take() else {
            return;
        };
        tracing::warn!(
            connection = %self.id,
            held_ms = pooled.held_for().as_millis() as u64,
            "connection dropped without close, releasing it to the pool"
        );
        // Attributes cannot be reset synchronously, so such connections are destroyed
        let destroy =
            self.invalidated.load(Ordering::SeqCst) || self.ctx.reset_defaults.is_some();
        self.ctx.pool.restore_detached(pooled, destroy);
    }
}

/// A pooled connection as seen by the application.
///
/// Clones share one underlying connection. Closing any clone returns it to
/// the pool; dropping the last clone without closing releases it too.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionProxy>,
}

impl ConnectionHandle {
    pub(crate) fn new(pooled: PooledConnection, ctx: Arc<ProxyContext>) -> Self {
        Self {
            inner: Arc::new(ConnectionProxy {
                id: pooled.id(),
                raw: Arc::clone(pooled.raw()),
                pooled: Mutex::new(Some(pooled)),
                state: ProxyState::new(),
                ctx,
                statements: Mutex::new(Vec::new()),
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Whether a fatal error marked the physical connection for destruction
    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::SeqCst)
    }

    /// How long this connection has been taken; zero once closed
    pub fn held_for(&self) -> Duration {
        self.inner
            .pooled
            .lock()
            .as_ref()
            .map(PooledConnection::held_for)
            .unwrap_or_default()
    }

    /// Open statement handles issued by this connection
    pub fn open_statements(&self) -> usize {
        self.inner
            .statements
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.is_open())
            .count()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.inner.state.ensure_open("connection")
    }

    pub(crate) fn ctx(&self) -> &Arc<ProxyContext> {
        &self.inner.ctx
    }

    /// Mark the connection for destruction when `error` says it is unusable
    pub(crate) fn note_error(&self, error: &DbcpError) {
        if error.is_connection_fatal() && !self.inner.invalidated.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                connection = %self.inner.id,
                error = %error,
                "connection invalidated by fatal error"
            );
        }
    }

    async fn intercept<T, Fut>(&self, method: &'static str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        self.inner
            .ctx
            .hooks
            .on_invoke(ProxyTarget::Connection, method)
            .await?;
        call.await.inspect_err(|e| self.note_error(e))
    }

    /// Create a statement for `key`, reusing a cached one when possible
    pub async fn prepare(&self, key: StatementKey) -> Result<StatementHandle> {
        self.ensure_open()?;
        let ctx = &self.inner.ctx;
        ctx.hooks
            .on_invoke(ProxyTarget::Connection, key.method())
            .await?;

        let raw = Arc::clone(&self.inner.raw);
        let prepare_key = key.clone();
        let entry = ctx
            .cache
            .get_or_create(self.inner.id, &key, move || async move {
                raw.prepare(&prepare_key).await
            })
            .await
            .inspect_err(|e| self.note_error(e))?;

        let statement = StatementHandle::new(self.clone(), key, entry);
        if !self.register_statement(&statement) {
            // Closed while the hooks or the prepare were running: give the
            // entry back instead of leaving it pinned by an orphaned handle
            if let Err(e) = statement.close().await {
                tracing::debug!(
                    connection = %self.inner.id,
                    error = %e,
                    "error closing statement of a closed connection"
                );
            }
            return Err(DbcpError::Closed("connection"));
        }
        Ok(statement)
    }

    /// Track `statement` for cascading close. False when the connection is no
    /// longer open; checked under the lock `close` drains.
    fn register_statement(&self, statement: &StatementHandle) -> bool {
        let mut statements = self.inner.statements.lock();
        statements.retain(|s| s.strong_count() > 0);
        statements.push(statement.downgrade());
        self.inner.state.is_open()
    }

    pub async fn create_statement(&self) -> Result<StatementHandle> {
        self.prepare(StatementKey::plain(Vec::new())).await
    }

    pub async fn create_statement_with(&self, args: Vec<PrepareArg>) -> Result<StatementHandle> {
        self.prepare(StatementKey::plain(args)).await
    }

    pub async fn prepare_statement(&self, sql: &str) -> Result<StatementHandle> {
        self.prepare(StatementKey::prepared(sql, Vec::new())).await
    }

    pub async fn prepare_statement_with(
        &self,
        sql: &str,
        args: Vec<PrepareArg>,
    ) -> Result<StatementHandle> {
        self.prepare(StatementKey::prepared(sql, args)).await
    }

    pub async fn prepare_call(&self, sql: &str) -> Result<StatementHandle> {
        self.prepare(StatementKey::callable(sql, Vec::new())).await
    }

    pub async fn prepare_call_with(
        &self,
        sql: &str,
        args: Vec<PrepareArg>,
    ) -> Result<StatementHandle> {
        self.prepare(StatementKey::callable(sql, args)).await
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.intercept("set_auto_commit", self.inner.raw.set_auto_commit(auto_commit))
            .await
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.intercept("set_read_only", self.inner.raw.set_read_only(read_only))
            .await
    }

    pub async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()> {
        self.intercept(
            "set_transaction_isolation",
            self.inner.raw.set_transaction_isolation(isolation),
        )
        .await
    }

    pub async fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.intercept("set_catalog", self.inner.raw.set_catalog(catalog))
            .await
    }

    pub async fn commit(&self) -> Result<()> {
        self.intercept("commit", self.inner.raw.commit()).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.intercept("rollback", self.inner.raw.rollback()).await
    }

    /// Close open statements, run the close hooks and return the connection
    /// to the pool.
    ///
    /// Only the first call does any work. Every failure along the way is
    /// collected and reported as one [`DbcpError::CloseAggregate`] after all
    /// steps ran.
    #[tracing::instrument(skip(self), fields(connection = %self.inner.id))]
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.state.begin_close() {
            return Ok(());
        }
        let ctx = &inner.ctx;
        let mut errors = CloseErrors::default();

        errors.record(ctx.hooks.on_invoke(ProxyTarget::Connection, "close").await);

        let statements: Vec<_> = inner.statements.lock().drain(..).collect();
        for statement in statements.iter().filter_map(StatementHandle::upgrade) {
            errors.record(statement.close().await);
        }

        let pooled = inner.pooled.lock().take();
        if let Some(pooled) = pooled {
            errors.record(ctx.hooks.on_close(&*inner.raw, pooled.held_for()).await);

            let mut destroy = inner.invalidated.load(Ordering::SeqCst);
            if let (false, Some(defaults)) = (destroy, &ctx.reset_defaults) {
                let failures = defaults.reset(&*inner.raw).await;
                if !failures.is_empty() {
                    destroy = true;
                    errors.extend(failures);
                }
            }
            ctx.pool.restore(pooled, destroy).await;
        }

        inner.state.finish_close();
        if !errors.is_empty() {
            tracing::debug!("connection closed with errors");
        }
        errors.into_result()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
