//! Connection pool implementation

use std::backtrace::Backtrace;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dbcp_core::{ConnectionId, Connector, DbcpError, RawConnection, Result};
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use super::config::PoolConfig;
use super::stats::PoolStats;
use super::wait::Wait;
use crate::cache::StatementCache;
use crate::hooks::HookRegistry;
use crate::retry::ConnectionCreator;

/// One physical connection owned by the pool
struct Slot {
    id: ConnectionId,
    raw: Arc<dyn RawConnection>,
    created_at: Instant,
    /// `None` until the connection is first restored
    restored_at: Option<Instant>,
}

impl Slot {
    fn idle_for(&self) -> Duration {
        self.restored_at.unwrap_or(self.created_at).elapsed()
    }
}

/// A semaphore permit that wakes non-fair waiters once it is released
pub(super) struct PoolPermit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        // Release first so woken waiters can grab the permit
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

/// Decrements a counter when dropped, even if the owning future is cancelled
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection taken from the pool.
///
/// It must be handed back through [`ConnectionPool::restore`] or
/// [`ConnectionPool::restore_detached`]; dropping it only frees the
/// capacity slot and leaks the physical connection.
pub struct PooledConnection {
    slot: Slot,
    taken_at: Instant,
    acquire_elapsed: Duration,
    permit: PoolPermit,
}

impl PooledConnection {
    pub fn id(&self) -> ConnectionId {
        self.slot.id
    }

    pub fn raw(&self) -> &Arc<dyn RawConnection> {
        &self.slot.raw
    }

    pub fn created_at(&self) -> Instant {
        self.slot.created_at
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// How long the caller has held this connection
    pub fn held_for(&self) -> Duration {
        self.taken_at.elapsed()
    }

    /// Time `take` spent waiting, validating and creating
    pub fn acquire_elapsed(&self) -> Duration {
        self.acquire_elapsed
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.slot.id)
            .field("held_for", &self.held_for())
            .finish()
    }
}

/// Diagnostic record of a taken connection, kept when tracking is enabled
#[derive(Debug, Clone)]
pub struct TakenConnection {
    pub id: ConnectionId,
    pub taken_at: Instant,
    /// Where the connection was acquired
    pub backtrace: String,
}

impl TakenConnection {
    pub fn held_for(&self) -> Duration {
        self.taken_at.elapsed()
    }
}

/// Bounded pool of physical connections.
///
/// Every taken connection holds one semaphore permit, so at most
/// `max_size` connections are taken at once. A new connection is only
/// created by a permit holder that found the idle set empty, which keeps
/// the number of physical connections within `max_size` as well.
pub struct ConnectionPool {
    config: PoolConfig,
    creator: ConnectionCreator,
    hooks: Arc<HookRegistry>,
    /// Statements cached per raw connection, purged when it is destroyed
    cache: Option<Arc<StatementCache>>,
    /// Idle connections; the back is the most recently restored
    idle: Mutex<VecDeque<Slot>>,
    semaphore: Arc<Semaphore>,
    released: Arc<Notify>,
    next_id: AtomicU64,
    created: AtomicUsize,
    taken: AtomicUsize,
    waiting: AtomicUsize,
    tracked: Mutex<HashMap<ConnectionId, TakenConnection>>,
    terminated: AtomicBool,
    pub(super) reducer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        hooks: Arc<HookRegistry>,
        cache: Option<Arc<StatementCache>>,
    ) -> Arc<Self> {
        let creator = ConnectionCreator::new(
            connector,
            config.connect_options.clone(),
            config.retry_attempts,
            config.backoff.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(config.max_size));

        Arc::new(Self {
            config,
            creator,
            hooks,
            cache,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            released: Arc::new(Notify::new()),
            next_id: AtomicU64::new(0),
            created: AtomicUsize::new(0),
            taken: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            tracked: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
            reducer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn ensure_running(&self) -> Result<()> {
        if self.is_terminated() {
            Err(DbcpError::Closed("connection pool"))
        } else {
            Ok(())
        }
    }

    /// Eagerly create up to `initial_size` idle connections.
    ///
    /// Failures are logged and stop the warm-up; the pool still creates
    /// connections lazily later.
    #[tracing::instrument(skip(self), fields(pool = %self.config.name))]
    pub async fn warm_up(&self) -> usize {
        let mut created = 0;
        while self.created.load(Ordering::SeqCst) < self.config.initial_size {
            let Some(permit) = self.try_permit() else {
                break;
            };
            match self.create_slot().await {
                Ok(slot) => {
                    self.idle.lock().push_back(slot);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pool warm-up stopped");
                    break;
                }
            }
            drop(permit);
        }
        tracing::debug!(created, "pool warm-up finished");
        created
    }

    /// Take a connection, waiting according to `wait`.
    ///
    /// Idle connections are preferred, most recently restored first. A
    /// connection idle beyond the validation limit is validated first and
    /// replaced transparently if it fails.
    pub async fn take(&self, wait: Wait) -> Result<PooledConnection> {
        let started = Instant::now();
        let permit = self.acquire_permit(wait, started).await?;

        loop {
            self.ensure_running()?;
            let idle = self.idle.lock().pop_back();
            let slot = match idle {
                Some(slot) => {
                    if self.config.validation.requires_validation(slot.idle_for())
                        && !self.validate(&slot).await
                    {
                        self.destroy_slot(slot).await;
                        continue;
                    }
                    slot
                }
                None => self.create_slot().await?,
            };
            return Ok(self.hand_out(slot, permit, started));
        }
    }

    fn try_permit(&self) -> Option<PoolPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.wrap_permit(permit))
    }

    fn wrap_permit(&self, permit: OwnedSemaphorePermit) -> PoolPermit {
        PoolPermit {
            permit: Some(permit),
            released: self.released.clone(),
        }
    }

    async fn acquire_permit(&self, wait: Wait, started: Instant) -> Result<PoolPermit> {
        self.ensure_running()?;
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.wrap_permit(permit)),
            Err(TryAcquireError::Closed) => return Err(DbcpError::Closed("connection pool")),
            Err(TryAcquireError::NoPermits) => {}
        }

        let limit = match wait {
            Wait::NoWait => {
                return Err(DbcpError::AcquireTimeout {
                    waited: started.elapsed(),
                });
            }
            Wait::Forever => None,
            Wait::For(limit) => Some(limit),
        };

        let _waiting = CountGuard::new(&self.waiting);
        let permit = match limit {
            None => self.wait_for_permit().await?,
            Some(limit) => tokio::time::timeout(limit, self.wait_for_permit())
                .await
                .map_err(|_| DbcpError::AcquireTimeout {
                    waited: started.elapsed(),
                })??,
        };
        Ok(self.wrap_permit(permit))
    }

    async fn wait_for_permit(&self) -> Result<OwnedSemaphorePermit> {
        if self.config.fair {
            // The semaphore queues waiters in arrival order
            return self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DbcpError::Closed("connection pool"));
        }

        loop {
            let released = self.released.notified();
            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::Closed) => return Err(DbcpError::Closed("connection pool")),
                Err(TryAcquireError::NoPermits) => released.await,
            }
        }
    }

    async fn validate(&self, slot: &Slot) -> bool {
        let idle = slot.idle_for();
        let timeout = self.config.validate_timeout;
        let check = slot.raw.is_valid(&self.config.test_query);
        let checked = if timeout.is_zero() {
            Ok(check.await)
        } else {
            tokio::time::timeout(timeout, check).await
        };

        let outcome = match checked {
            Ok(Ok(true)) => self.hooks.on_validate(&*slot.raw, idle).await,
            Ok(Ok(false)) => Err(DbcpError::Connection("connection reported invalid".into())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DbcpError::Connection(format!(
                "validation timed out after {:?}",
                timeout
            ))),
        };

        match outcome {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    pool = %self.config.name,
                    connection = %slot.id,
                    idle_ms = idle.as_millis() as u64,
                    error = %e,
                    "idle connection failed validation"
                );
                false
            }
        }
    }

    async fn create_slot(&self) -> Result<Slot> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let created = match self.creator.create().await {
            Ok(created) => created,
            Err(e) => {
                self.created.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        let initialized = match self.hooks.on_init(&*created.raw, created.elapsed).await {
            Ok(()) => self.config.defaults.apply(&*created.raw).await,
            Err(e) => Err(e),
        };
        if let Err(e) = initialized {
            tracing::warn!(
                pool = %self.config.name,
                connection = %id,
                error = %e,
                "connection initialization failed"
            );
            self.destroy_raw(id, &created.raw).await;
            self.created.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        tracing::debug!(
            pool = %self.config.name,
            connection = %id,
            attempts = created.attempts,
            elapsed_ms = created.elapsed.as_millis() as u64,
            "created connection"
        );
        Ok(Slot {
            id,
            raw: created.raw,
            created_at: Instant::now(),
            restored_at: None,
        })
    }

    fn hand_out(&self, slot: Slot, permit: PoolPermit, started: Instant) -> PooledConnection {
        self.taken.fetch_add(1, Ordering::SeqCst);
        let taken_at = Instant::now();
        if self.config.tracking {
            self.tracked.lock().insert(
                slot.id,
                TakenConnection {
                    id: slot.id,
                    taken_at,
                    backtrace: Backtrace::force_capture().to_string(),
                },
            );
        }
        PooledConnection {
            slot,
            taken_at,
            acquire_elapsed: started.elapsed(),
            permit,
        }
    }

    /// Give a taken connection back, or destroy it when `destroy` is set
    #[tracing::instrument(skip(self, conn), fields(pool = %self.config.name, connection = %conn.id()))]
    pub async fn restore(&self, conn: PooledConnection, destroy: bool) {
        let PooledConnection { slot, permit, .. } = conn;
        if let Some(slot) = self.check_in(slot, destroy) {
            self.destroy_slot(slot).await;
        }
        // Capacity is freed only after a destroyed connection is gone
        drop(permit);
    }

    /// Restore from a synchronous context such as `Drop`.
    ///
    /// A connection that must be destroyed is closed on a spawned task; with
    /// no runtime available it is released without closing.
    pub fn restore_detached(self: &Arc<Self>, conn: PooledConnection, destroy: bool) {
        let PooledConnection { slot, permit, .. } = conn;
        let Some(slot) = self.check_in(slot, destroy) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                handle.spawn(async move {
                    pool.destroy_slot(slot).await;
                    drop(permit);
                });
            }
            Err(_) => {
                self.created.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(
                    pool = %self.config.name,
                    connection = %slot.id,
                    "no async runtime to close connection, releasing it unclosed"
                );
            }
        }
    }

    /// Move a returned connection into the idle set, or hand it back when it
    /// has to be destroyed
    fn check_in(&self, mut slot: Slot, destroy: bool) -> Option<Slot> {
        self.tracked.lock().remove(&slot.id);
        self.taken.fetch_sub(1, Ordering::SeqCst);

        let mut idle = self.idle.lock();
        // Checked under the idle lock so terminate cannot miss this slot
        if destroy || self.is_terminated() || slot.raw.is_closed() {
            return Some(slot);
        }
        slot.restored_at = Some(Instant::now());
        idle.push_back(slot);
        None
    }

    async fn destroy_slot(&self, slot: Slot) {
        self.destroy_raw(slot.id, &slot.raw).await;
        self.created.fetch_sub(1, Ordering::SeqCst);
    }

    async fn destroy_raw(&self, id: ConnectionId, raw: &Arc<dyn RawConnection>) {
        if let Some(cache) = &self.cache {
            for statement in cache.purge_connection(id) {
                if let Err(e) = statement.close().await {
                    tracing::debug!(connection = %id, error = %e, "error closing cached statement");
                }
            }
        }

        let started = Instant::now();
        if let Err(e) = raw.close().await {
            tracing::debug!(
                pool = %self.config.name,
                connection = %id,
                error = %e,
                "error closing raw connection"
            );
        }
        self.hooks.on_destroy(&**raw, started.elapsed()).await;
        tracing::debug!(pool = %self.config.name, connection = %id, "destroyed connection");
    }

    /// Destroy idle connections, oldest first, until at most `target`
    /// connections remain. Never touches taken connections.
    pub(super) async fn shrink_to(&self, target: usize) -> usize {
        let mut destroyed = 0;
        while self.created.load(Ordering::SeqCst) > target {
            let Some(permit) = self.try_permit() else {
                break;
            };
            let oldest = self.idle.lock().pop_front();
            let Some(slot) = oldest else {
                break;
            };
            self.destroy_slot(slot).await;
            drop(permit);
            destroyed += 1;
        }
        destroyed
    }

    /// Stop handing out connections and destroy every idle one.
    ///
    /// Waiters fail with `Closed`; connections still taken are destroyed
    /// when they are restored.
    #[tracing::instrument(skip(self), fields(pool = %self.config.name))]
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(reducer) = self.reducer.lock().take() {
            reducer.abort();
        }
        self.semaphore.close();
        self.released.notify_waiters();

        let idle: Vec<Slot> = self.idle.lock().drain(..).collect();
        let destroyed = idle.len();
        for slot in idle {
            self.destroy_slot(slot).await;
        }
        tracing::info!(
            destroyed,
            still_taken = self.taken.load(Ordering::SeqCst),
            "connection pool terminated"
        );
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn taken_count(&self) -> usize {
        self.taken.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        PoolStats::new(
            self.created.load(Ordering::SeqCst),
            idle,
            self.taken.load(Ordering::SeqCst),
            self.waiting.load(Ordering::SeqCst),
            self.config.max_size,
        )
    }

    /// Taken connections in acquisition order; empty unless tracking is enabled
    pub fn taken_connections(&self) -> Vec<TakenConnection> {
        let mut taken: Vec<_> = self.tracked.lock().values().cloned().collect();
        taken.sort_by_key(|t| t.taken_at);
        taken
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(reducer) = self.reducer.get_mut().take() {
            reducer.abort();
        }
    }
}
