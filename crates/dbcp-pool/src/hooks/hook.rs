//! Hook traits and the tagged [`Hook`] value used for registration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbcp_core::{
    BoundParam, ConnectionId, ExecuteMethod, ExecuteOutcome, RawConnection, RawStatement, Result,
    StatementKind,
};
use futures::future::BoxFuture;

/// Extension points a hook can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookCategory {
    /// After a physical connection is created
    InitConnection,
    /// After an idle connection is taken, when it needs validation
    ValidateConnection,
    /// After `acquire_connection`, including on timeout
    GetConnection,
    /// Before a connection is restored to the pool
    CloseConnection,
    /// After a physical connection is closed
    DestroyConnection,
    /// Before any intercepted handle operation
    MethodInvocation,
    /// Around every execute call
    StatementExecution,
    /// After a result cursor is closed
    ResultSetRetrieval,
}

impl fmt::Display for HookCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookCategory::InitConnection => "init_connection",
            HookCategory::ValidateConnection => "validate_connection",
            HookCategory::GetConnection => "get_connection",
            HookCategory::CloseConnection => "close_connection",
            HookCategory::DestroyConnection => "destroy_connection",
            HookCategory::MethodInvocation => "method_invocation",
            HookCategory::StatementExecution => "statement_execution",
            HookCategory::ResultSetRetrieval => "result_set_retrieval",
        };
        f.write_str(name)
    }
}

/// The kind of handle an intercepted operation was invoked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyTarget {
    Connection,
    Statement,
    Cursor,
}

#[async_trait]
pub trait InitConnectionHook: Send + Sync {
    /// `taken` covers every connect attempt and the retry delays between them
    async fn on_init(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()>;
}

#[async_trait]
pub trait ValidateConnectionHook: Send + Sync {
    /// An error marks the connection invalid; it is destroyed and replaced
    async fn on_validate(&self, raw: &dyn RawConnection, idle: Duration) -> Result<()>;
}

#[async_trait]
pub trait GetConnectionHook: Send + Sync {
    /// `raw` is `None` when the acquire timed out
    async fn on_get(&self, raw: Option<&dyn RawConnection>, taken: Duration) -> Result<()>;
}

#[async_trait]
pub trait CloseConnectionHook: Send + Sync {
    /// `taken` is how long the application held the connection
    async fn on_close(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()>;
}

#[async_trait]
pub trait DestroyConnectionHook: Send + Sync {
    /// `took` is the time spent closing the physical connection
    async fn on_destroy(&self, raw: &dyn RawConnection, took: Duration);
}

#[async_trait]
pub trait MethodInvocationHook: Send + Sync {
    async fn on_invoke(&self, target: ProxyTarget, method: &str) -> Result<()>;
}

/// Around hook for execute calls.
///
/// Implementations call [`StatementProceed::proceed`] to run the rest of
/// the chain and the real execute; they may time it, inspect or replace its
/// result, or skip it by returning early.
#[async_trait]
pub trait StatementExecutionHook: Send + Sync {
    async fn on_execute(
        &self,
        ctx: &ExecutionContext,
        proceed: StatementProceed<'_>,
    ) -> Result<ExecuteOutcome>;
}

#[async_trait]
pub trait ResultSetRetrievalHook: Send + Sync {
    /// `params` is `None` unless `includeQueryParameters` is set
    async fn on_retrieved(&self, sql: &str, params: Option<&[BoundParam]>, size: u64)
    -> Result<()>;
}

/// Describes one execute call
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub connection: ConnectionId,
    pub kind: StatementKind,
    pub method: ExecuteMethod,
    /// Prepared SQL, or the SQL passed to a plain statement's execute
    pub sql: String,
    /// Binding calls in call order; always forwarded to the driver
    bound: Vec<BoundParam>,
    include_params: bool,
}

impl ExecutionContext {
    pub(crate) fn new(
        connection: ConnectionId,
        kind: StatementKind,
        method: ExecuteMethod,
        sql: String,
        bound: Vec<BoundParam>,
        include_params: bool,
    ) -> Self {
        Self {
            connection,
            kind,
            method,
            sql,
            bound,
            include_params,
        }
    }

    /// Bound parameters, visible only when `includeQueryParameters` is set
    pub fn params(&self) -> Option<&[BoundParam]> {
        self.include_params.then_some(self.bound.as_slice())
    }

    pub(crate) fn into_parts(self) -> (String, Vec<BoundParam>) {
        (self.sql, self.bound)
    }

    /// SQL text forwarded to the driver; only plain statements send it
    pub fn execute_sql(&self) -> Option<&str> {
        match self.kind {
            StatementKind::Plain => Some(&self.sql),
            StatementKind::Prepared | StatementKind::Callable => None,
        }
    }
}

/// Continuation handed to a [`StatementExecutionHook`]: the remaining hooks
/// of the chain followed by the real execute call
pub struct StatementProceed<'a> {
    rest: &'a [Arc<dyn StatementExecutionHook>],
    target: &'a dyn RawStatement,
    ctx: &'a ExecutionContext,
}

impl<'a> StatementProceed<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn StatementExecutionHook>],
        target: &'a dyn RawStatement,
        ctx: &'a ExecutionContext,
    ) -> Self {
        Self {
            rest: chain,
            target,
            ctx,
        }
    }

    /// Run the rest of the chain
    pub fn proceed(self) -> BoxFuture<'a, Result<ExecuteOutcome>> {
        let StatementProceed { rest, target, ctx } = self;
        match rest.split_first() {
            Some((hook, rest)) => {
                let next = StatementProceed { rest, target, ctx };
                Box::pin(async move { hook.on_execute(ctx, next).await })
            }
            None => Box::pin(async move {
                target
                    .execute(ctx.method, ctx.execute_sql(), &ctx.bound)
                    .await
            }),
        }
    }
}

/// Adapts a closure to a hook trait
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> InitConnectionHook for FnHook<F>
where
    F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync,
{
    async fn on_init(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()> {
        (self.0)(raw, taken)
    }
}

#[async_trait]
impl<F> ValidateConnectionHook for FnHook<F>
where
    F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync,
{
    async fn on_validate(&self, raw: &dyn RawConnection, idle: Duration) -> Result<()> {
        (self.0)(raw, idle)
    }
}

#[async_trait]
impl<F> GetConnectionHook for FnHook<F>
where
    F: Fn(Option<&dyn RawConnection>, Duration) -> Result<()> + Send + Sync,
{
    async fn on_get(&self, raw: Option<&dyn RawConnection>, taken: Duration) -> Result<()> {
        (self.0)(raw, taken)
    }
}

#[async_trait]
impl<F> CloseConnectionHook for FnHook<F>
where
    F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync,
{
    async fn on_close(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()> {
        (self.0)(raw, taken)
    }
}

#[async_trait]
impl<F> DestroyConnectionHook for FnHook<F>
where
    F: Fn(&dyn RawConnection, Duration) + Send + Sync,
{
    async fn on_destroy(&self, raw: &dyn RawConnection, took: Duration) {
        (self.0)(raw, took)
    }
}

#[async_trait]
impl<F> MethodInvocationHook for FnHook<F>
where
    F: Fn(ProxyTarget, &str) -> Result<()> + Send + Sync,
{
    async fn on_invoke(&self, target: ProxyTarget, method: &str) -> Result<()> {
        (self.0)(target, method)
    }
}

#[async_trait]
impl<F> ResultSetRetrievalHook for FnHook<F>
where
    F: Fn(&str, Option<&[BoundParam]>, u64) -> Result<()> + Send + Sync,
{
    async fn on_retrieved(
        &self,
        sql: &str,
        params: Option<&[BoundParam]>,
        size: u64,
    ) -> Result<()> {
        (self.0)(sql, params, size)
    }
}

/// A hook tagged with its category, ready for registration
#[derive(Clone)]
pub enum Hook {
    InitConnection(Arc<dyn InitConnectionHook>),
    ValidateConnection(Arc<dyn ValidateConnectionHook>),
    GetConnection(Arc<dyn GetConnectionHook>),
    CloseConnection(Arc<dyn CloseConnectionHook>),
    DestroyConnection(Arc<dyn DestroyConnectionHook>),
    MethodInvocation(Arc<dyn MethodInvocationHook>),
    StatementExecution(Arc<dyn StatementExecutionHook>),
    ResultSetRetrieval(Arc<dyn ResultSetRetrievalHook>),
}

impl Hook {
    pub fn category(&self) -> HookCategory {
        match self {
            Hook::InitConnection(_) => HookCategory::InitConnection,
            Hook::ValidateConnection(_) => HookCategory::ValidateConnection,
            Hook::GetConnection(_) => HookCategory::GetConnection,
            Hook::CloseConnection(_) => HookCategory::CloseConnection,
            Hook::DestroyConnection(_) => HookCategory::DestroyConnection,
            Hook::MethodInvocation(_) => HookCategory::MethodInvocation,
            Hook::StatementExecution(_) => HookCategory::StatementExecution,
            Hook::ResultSetRetrieval(_) => HookCategory::ResultSetRetrieval,
        }
    }

    pub fn init_connection_fn<F>(f: F) -> Self
    where
        F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync + 'static,
    {
        Hook::InitConnection(Arc::new(FnHook(f)))
    }

    pub fn validate_connection_fn<F>(f: F) -> Self
    where
        F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync + 'static,
    {
        Hook::ValidateConnection(Arc::new(FnHook(f)))
    }

    pub fn get_connection_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&dyn RawConnection>, Duration) -> Result<()> + Send + Sync + 'static,
    {
        Hook::GetConnection(Arc::new(FnHook(f)))
    }

    pub fn close_connection_fn<F>(f: F) -> Self
    where
        F: Fn(&dyn RawConnection, Duration) -> Result<()> + Send + Sync + 'static,
    {
        Hook::CloseConnection(Arc::new(FnHook(f)))
    }

    pub fn destroy_connection_fn<F>(f: F) -> Self
    where
        F: Fn(&dyn RawConnection, Duration) + Send + Sync + 'static,
    {
        Hook::DestroyConnection(Arc::new(FnHook(f)))
    }

    pub fn method_invocation_fn<F>(f: F) -> Self
    where
        F: Fn(ProxyTarget, &str) -> Result<()> + Send + Sync + 'static,
    {
        Hook::MethodInvocation(Arc::new(FnHook(f)))
    }

    pub fn result_set_retrieval_fn<F>(f: F) -> Self
    where
        F: Fn(&str, Option<&[BoundParam]>, u64) -> Result<()> + Send + Sync + 'static,
    {
        Hook::ResultSetRetrieval(Arc::new(FnHook(f)))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.category()).finish()
    }
}
