//! dbcp core - shared abstractions for the connection pool
//!
//! This crate provides the types every other dbcp crate depends on:
//!
//! - `Connector`, `RawConnection`, `RawStatement`, `RawCursor` - the boundary
//!   a database driver implements
//! - `StatementKey` and friends - the vocabulary of the statement cache
//! - `DbcpError` - the error taxonomy surfaced to applications
//! - Common types like `Value`, `Row`, `TransactionIsolation`

mod connection;
mod error;
mod statement;
mod types;

pub use connection::*;
pub use error::*;
pub use statement::*;
pub use types::*;
