//! Connection creation with bounded retry
//!
//! A physical connection attempt may fail transiently. The creator retries
//! up to `acquireRetryAttempts` times, sleeping between attempts, and only
//! then surfaces a [`DbcpError::CreationFailure`](dbcp_core::DbcpError).
//!
//! # Example
//!
//! ```ignore
//! use dbcp_pool::retry::{BackoffStrategy, ConnectionCreator};
//!
//! let creator = ConnectionCreator::new(connector, options, 3, BackoffStrategy::constant(1000));
//! let created = creator.create().await?;
//! println!("connected after {} attempt(s) in {:?}", created.attempts, created.elapsed);
//! ```

mod backoff;
mod creator;


pub use backoff::BackoffStrategy;
pub use creator::{ConnectionCreator, Created};
