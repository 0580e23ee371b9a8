//! Cache keys and entries

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dbcp_core::{ConnectionId, RawStatement, StatementKey};

/// A statement creation call on one physical connection.
///
/// Raw statements belong to the connection that prepared them, so the
/// connection is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub connection: ConnectionId,
    pub statement: StatementKey,
}

impl CacheKey {
    pub fn new(connection: ConnectionId, statement: StatementKey) -> Self {
        Self {
            connection,
            statement,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.statement)
    }
}

/// A raw statement together with its cache bookkeeping
pub struct StatementEntry {
    statement: Arc<dyn RawStatement>,
    /// `None` when the statement bypassed the cache
    key: Option<CacheKey>,
    in_use: AtomicBool,
    /// Removed from the cache while in use; closed on release
    evicted: AtomicBool,
}

impl StatementEntry {
    /// A freshly inserted entry, already in use by its creator
    pub(super) fn cached(key: CacheKey, statement: Arc<dyn RawStatement>) -> Self {
        Self {
            statement,
            key: Some(key),
            in_use: AtomicBool::new(true),
            evicted: AtomicBool::new(false),
        }
    }

    /// A statement that is never stored and gets closed on release
    pub(super) fn uncached(statement: Arc<dyn RawStatement>) -> Self {
        Self {
            statement,
            key: None,
            in_use: AtomicBool::new(true),
            evicted: AtomicBool::new(false),
        }
    }

    pub fn statement(&self) -> &Arc<dyn RawStatement> {
        &self.statement
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// Mark in-use; false if another caller already holds it
    pub(super) fn try_acquire(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(super) fn mark_released(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }

    pub(super) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for StatementEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementEntry")
            .field("key", &self.key)
            .field("in_use", &self.is_in_use())
            .field("evicted", &self.is_evicted())
            .finish()
    }
}
