//! dbcp pool - database connection pool with a statement cache
//!
//! This crate provides:
//! - A bounded connection pool with fairness, retrying creation,
//!   validation of idle connections and a background reducer
//! - An LRU cache of prepared statements with in-use tracking
//! - Ordered application hooks around the connection and statement lifecycle
//! - Connection, statement and cursor handles with idempotent,
//!   cascading close
//!
//! # Example
//!
//! ```ignore
//! use dbcp_pool::{DataSource, DbcpConfig};
//!
//! let config = DbcpConfig::new("postgresql", "postgres://localhost/app")
//!     .with_pool_size(2, 20)
//!     .with_statement_cache(100);
//! let data_source = DataSource::new(config, connector)?;
//! data_source.start().await?;
//!
//! let conn = data_source.acquire_connection().await?;
//! let stmt = conn.prepare_statement("select name from users where id = ?").await?;
//! stmt.bind(1, 7)?;
//! let rows = stmt.execute_query().await?.fetch_all().await?;
//! conn.close().await?;
//! ```

pub mod cache;
pub mod config;
mod datasource;
pub mod hooks;
pub mod pool;
pub mod proxy;
pub mod retry;

#[cfg(test)]
mod mock;

pub use cache::{StatementCache, StatementEntry};
pub use config::{ConnectionDefaults, DbcpConfig, STATEMENT_CACHE_MAX_SIZE};
pub use datasource::DataSource;
pub use hooks::{Hook, HookCategory, HookRegistry, ProxyTarget};
pub use pool::{PoolStats, TakenConnection, Wait};
pub use proxy::{ConnectionHandle, CursorHandle, Execution, StatementHandle};

pub use dbcp_core::{DbcpError, Result};
