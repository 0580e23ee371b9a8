//! Data source: the entry point applications use

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dbcp_core::{Connector, Result};

use crate::cache::StatementCache;
use crate::config::DbcpConfig;
use crate::hooks::{Hook, HookRegistry, builtin_hooks};
use crate::pool::{ConnectionPool, PoolConfig, PoolStats, TakenConnection, Wait};
use crate::proxy::{ConnectionHandle, ProxyContext};

/// A configured pool with its statement cache and hooks
pub struct DataSource {
    config: DbcpConfig,
    ctx: Arc<ProxyContext>,
    started: AtomicBool,
}

impl DataSource {
    /// Validate `config` and assemble the pool. Built-in logging hooks are
    /// registered ahead of any application hook.
    ///
    /// No connection is opened until [`start`](Self::start) or the first
    /// acquire.
    pub fn new(config: DbcpConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let hooks = Arc::new(HookRegistry::new());
        for hook in builtin_hooks(&config) {
            hooks.register(hook);
        }
        let cache = Arc::new(StatementCache::new(config.statement_cache_max_size));
        let pool = ConnectionPool::new(
            PoolConfig::from(&config),
            connector,
            Arc::clone(&hooks),
            cache.is_enabled().then(|| Arc::clone(&cache)),
        );
        let ctx = Arc::new(ProxyContext::new(&config, pool, cache, hooks));

        tracing::info!(
            pool = %config.pool_name,
            driver = %config.driver_name,
            initial = config.pool_initial_size,
            max = config.pool_max_size,
            fair = config.pool_fair,
            statement_cache = config.statement_cache_max_size,
            "data source created"
        );
        Ok(Self {
            config,
            ctx,
            started: AtomicBool::new(false),
        })
    }

    /// Warm the pool up to its initial size and start the reducer.
    ///
    /// Calling it again has no effect. Returns the number of connections
    /// created.
    #[tracing::instrument(skip(self), fields(pool = %self.config.pool_name))]
    pub async fn start(&self) -> Result<usize> {
        self.ctx.pool.ensure_running()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let created = self.ctx.pool.warm_up().await;
        self.ctx.pool.start_reducer();
        Ok(created)
    }

    pub fn register_hook(&self, hook: Hook) {
        self.ctx.hooks.register(hook);
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.ctx.hooks
    }

    /// Acquire a connection, waiting up to `createConnectionTimeoutInMs`
    pub async fn acquire_connection(&self) -> Result<ConnectionHandle> {
        self.acquire_connection_with(self.config.acquire_wait())
            .await
    }

    /// Acquire a connection with an explicit wait.
    ///
    /// The get-connection hooks run after every attempt. On timeout they
    /// receive no raw connection; their errors are then only logged and the
    /// caller gets the timeout. When a hook rejects an acquired connection
    /// it goes back to the pool and the hook's error is returned.
    #[tracing::instrument(skip(self), fields(pool = %self.config.pool_name))]
    pub async fn acquire_connection_with(&self, wait: Wait) -> Result<ConnectionHandle> {
        let started = Instant::now();
        let pool = &self.ctx.pool;

        match pool.take(wait).await {
            Ok(pooled) => {
                let hooked = self
                    .ctx
                    .hooks
                    .on_get(Some(&**pooled.raw()), started.elapsed())
                    .await;
                if let Err(e) = hooked {
                    pool.restore(pooled, false).await;
                    return Err(e);
                }
                Ok(ConnectionHandle::new(pooled, Arc::clone(&self.ctx)))
            }
            Err(e) if e.is_timeout() => {
                if let Err(hook_error) = self.ctx.hooks.on_get(None, started.elapsed()).await {
                    tracing::warn!(error = %hook_error, "get connection hook failed after timeout");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Destroy every idle connection, fail waiters, and clear the statement
    /// cache. Connections still taken are destroyed when closed.
    pub async fn terminate(&self) {
        self.ctx.pool.terminate().await;
        let closed = self.ctx.cache.clear().await;
        tracing::debug!(pool = %self.config.pool_name, closed, "statement cache cleared");
    }

    pub fn is_terminated(&self) -> bool {
        self.ctx.pool.is_terminated()
    }

    pub fn stats(&self) -> PoolStats {
        self.ctx.pool.stats()
    }

    /// Taken connections with their acquisition backtraces; empty unless
    /// `poolEnableConnectionTracking` is set
    pub fn taken_connections(&self) -> Vec<TakenConnection> {
        self.ctx.pool.taken_connections()
    }

    pub fn statement_cache(&self) -> &Arc<StatementCache> {
        &self.ctx.cache
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.ctx.pool
    }

    pub fn config(&self) -> &DbcpConfig {
        &self.config
    }
}
