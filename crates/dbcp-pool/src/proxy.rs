//! Application-facing handles
//!
//! [`ConnectionHandle`], [`StatementHandle`] and [`CursorHandle`] wrap the
//! raw driver objects. Every operation runs the method invocation hooks
//! first; execute calls run through the statement execution chain. Closing
//! is idempotent and cascades from a connection to its statements and from
//! a statement to its cursors.
//!
//! # Example
//!
//! ```ignore
//! let conn = data_source.acquire_connection().await?;
//! let stmt = conn.prepare_statement("select * from users where id = ?").await?;
//! stmt.bind(1, 42)?;
//! let mut cursor = stmt.execute_query().await?;
//! while let Some(row) = cursor.next().await? {
//!     // ...
//! }
//! conn.close().await?; // also closes stmt and cursor
//! ```

mod connection;
mod context;
mod cursor;
mod state;
mod statement;


pub use connection::ConnectionHandle;
pub(crate) use context::ProxyContext;
pub use cursor::CursorHandle;
pub use state::ProxyState;
pub use statement::{Execution, StatementHandle};
