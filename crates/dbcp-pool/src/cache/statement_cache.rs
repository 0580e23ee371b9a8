//! LRU statement cache with in-use tracking

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dbcp_core::{ConnectionId, RawStatement, Result, StatementKey};
use lru::LruCache;
use parking_lot::Mutex;

use super::entry::{CacheKey, StatementEntry};
use crate::config::STATEMENT_CACHE_MAX_SIZE;

enum Lookup {
    Hit(Arc<StatementEntry>),
    /// Cached, but held by another caller
    Busy,
    Miss,
}

/// Statement cache shared by every connection of a pool.
///
/// The map lock is never held while a driver prepares or closes a
/// statement. Acquiring, releasing and evicting an entry all happen under
/// the lock, so an in-use entry can neither be handed out twice nor
/// evicted.
pub struct StatementCache {
    capacity: usize,
    entries: Mutex<LruCache<CacheKey, Arc<StatementEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatementCache {
    /// `capacity` is clamped to the supported maximum; 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.min(STATEMENT_CACHE_MAX_SIZE),
            entries: Mutex::new(LruCache::unbounded()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Whether `key` is cached for `connection`, without touching recency
    pub fn contains(&self, connection: ConnectionId, key: &StatementKey) -> bool {
        self.entries
            .lock()
            .contains(&CacheKey::new(connection, key.clone()))
    }

    /// Return the cached statement for `key`, marking it in-use, or create
    /// one with `factory`.
    ///
    /// A statement is created uncached when caching is disabled, when the
    /// cached one is held by another caller, or when every cached entry is
    /// in use and nothing can be evicted.
    pub async fn get_or_create<F, Fut>(
        &self,
        connection: ConnectionId,
        key: &StatementKey,
        factory: F,
    ) -> Result<Arc<StatementEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn RawStatement>>>,
    {
        if !self.is_enabled() {
            return Ok(Arc::new(StatementEntry::uncached(factory().await?)));
        }

        let cache_key = CacheKey::new(connection, key.clone());
        let lookup = {
            let mut entries = self.entries.lock();
            match entries.get(&cache_key) {
                Some(entry) if entry.try_acquire() => Lookup::Hit(Arc::clone(entry)),
                Some(_) => Lookup::Busy,
                None => Lookup::Miss,
            }
        };

        match lookup {
            Lookup::Hit(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %cache_key, "statement cache hit");
                Ok(entry)
            }
            Lookup::Busy => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %cache_key, "cached statement in use, bypassing cache");
                Ok(Arc::new(StatementEntry::uncached(factory().await?)))
            }
            Lookup::Miss => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let statement = factory().await?;
                let (entry, evicted) = self.insert(cache_key, statement);
                if let Some(evicted) = evicted {
                    close_statement(&evicted).await;
                }
                Ok(entry)
            }
        }
    }

    /// Insert a new in-use entry, evicting the least recently used idle
    /// entry when full. Returns the entry and the evicted statement.
    fn insert(
        &self,
        key: CacheKey,
        statement: Arc<dyn RawStatement>,
    ) -> (Arc<StatementEntry>, Option<Arc<dyn RawStatement>>) {
        let mut entries = self.entries.lock();

        // Another caller cached the same call while we were preparing
        if entries.contains(&key) {
            return (Arc::new(StatementEntry::uncached(statement)), None);
        }

        let mut evicted = None;
        if entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .rev()
                .find(|(_, entry)| !entry.is_in_use())
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                tracing::trace!(key = %key, "every cached statement in use, bypassing cache");
                return (Arc::new(StatementEntry::uncached(statement)), None);
            };
            if let Some(entry) = entries.pop(&victim) {
                entry.mark_evicted();
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %victim, "evicted cached statement");
                evicted = Some(Arc::clone(entry.statement()));
            }
        }

        let entry = Arc::new(StatementEntry::cached(key.clone(), statement));
        entries.put(key, Arc::clone(&entry));
        (entry, evicted)
    }

    /// Release an entry after use.
    ///
    /// Returns the statement when it has to be closed now: the entry
    /// bypassed the cache or was evicted while in use. Otherwise the entry
    /// becomes the most recently used and available again.
    pub fn release_entry(&self, entry: &StatementEntry) -> Option<Arc<dyn RawStatement>> {
        let Some(key) = entry.key() else {
            return Some(Arc::clone(entry.statement()));
        };

        let mut entries = self.entries.lock();
        entry.mark_released();
        if entry.is_evicted() {
            return Some(Arc::clone(entry.statement()));
        }
        entries.promote(key);
        None
    }

    /// Release an entry, closing its statement when it is not kept
    pub async fn release(&self, entry: &StatementEntry) {
        if let Some(statement) = self.release_entry(entry) {
            close_statement(&statement).await;
        }
    }

    /// Remove every entry of one connection.
    ///
    /// Returns the idle statements for the caller to close; in-use ones are
    /// closed when released.
    pub fn purge_connection(&self, connection: ConnectionId) -> Vec<Arc<dyn RawStatement>> {
        let mut entries = self.entries.lock();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.connection == connection)
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter()
            .filter_map(|key| entries.pop(key))
            .filter_map(Self::take_if_idle)
            .collect()
    }

    /// Remove every entry, returning the idle statements for the caller to close
    pub fn drain(&self) -> Vec<Arc<dyn RawStatement>> {
        let mut entries = self.entries.lock();
        let mut idle = Vec::with_capacity(entries.len());
        while let Some((_, entry)) = entries.pop_lru() {
            idle.extend(Self::take_if_idle(entry));
        }
        idle
    }

    /// Empty the cache and close every idle statement
    pub async fn clear(&self) -> usize {
        let idle = self.drain();
        let closed = idle.len();
        for statement in idle {
            close_statement(&statement).await;
        }
        closed
    }

    fn take_if_idle(entry: Arc<StatementEntry>) -> Option<Arc<dyn RawStatement>> {
        entry.mark_evicted();
        (!entry.is_in_use()).then(|| Arc::clone(entry.statement()))
    }
}

async fn close_statement(statement: &Arc<dyn RawStatement>) {
    if let Err(e) = statement.close().await {
        tracing::debug!(error = %e, "error closing evicted statement");
    }
}
