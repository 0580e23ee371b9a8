//! Connection pool engine
//!
//! A bounded pool of physical connections with optional FIFO fairness,
//! lazy creation with retry, validation of idle connections and a
//! background reducer that shrinks the pool when demand drops.
//!
//! # Example
//!
//! ```ignore
//! use dbcp_pool::pool::{ConnectionPool, PoolConfig, Wait};
//!
//! let config = PoolConfig::new(2, 10).with_idle_limit_secs(0);
//! let pool = ConnectionPool::new(config, connector, hooks, None);
//! pool.warm_up().await;
//!
//! let conn = pool.take(Wait::For(Duration::from_millis(500))).await?;
//! // Use conn.raw()...
//! pool.restore(conn, false).await;
//! ```

mod config;
mod engine;
mod reducer;
mod stats;
mod validation;
mod wait;


pub use config::PoolConfig;
pub use engine::{ConnectionPool, PooledConnection, TakenConnection};
pub use stats::PoolStats;
pub use validation::ValidationPolicy;
pub use wait::Wait;
