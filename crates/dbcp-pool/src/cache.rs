//! Prepared statement cache
//!
//! A bounded LRU map from a statement creation call to the raw statement
//! it produced. An entry handed to one caller is marked in-use and is
//! neither handed out again nor evicted until it is released.

mod entry;
mod statement_cache;


pub use entry::{CacheKey, StatementEntry};
pub use statement_cache::StatementCache;
