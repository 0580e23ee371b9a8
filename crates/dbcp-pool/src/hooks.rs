//! Application hooks
//!
//! Hooks are callbacks invoked at fixed extension points of the connection
//! and statement lifecycle. Hooks of one category run in registration
//! order; the first error stops the chain and is returned to the caller.
//!
//! Some hooks receive the raw connection. They must not keep it: the pool
//! owns its lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use dbcp_pool::hooks::Hook;
//!
//! data_source.register_hook(Hook::get_connection_fn(|raw, taken| {
//!     tracing::info!(found = raw.is_some(), taken_ms = taken.as_millis() as u64, "acquired");
//!     Ok(())
//! }));
//! ```

mod builtin;
mod hook;
mod registry;


pub(crate) use builtin::builtin_hooks;
pub use builtin::{LargeResultSetLogger, SlowAcquireLogger, SlowQueryLogger};
pub use hook::{
    CloseConnectionHook, DestroyConnectionHook, ExecutionContext, FnHook, GetConnectionHook, Hook,
    HookCategory, InitConnectionHook, MethodInvocationHook, ProxyTarget, ResultSetRetrievalHook,
    StatementExecutionHook, StatementProceed, ValidateConnectionHook,
};
pub use registry::HookRegistry;
