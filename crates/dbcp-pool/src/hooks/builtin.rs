//! Logging hooks registered ahead of application hooks

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbcp_core::{BoundParam, ExecuteOutcome, RawConnection, Result};

use super::hook::{
    ExecutionContext, GetConnectionHook, Hook, ResultSetRetrievalHook, StatementExecutionHook,
    StatementProceed,
};
use crate::config::DbcpConfig;

/// The logging hooks enabled by `config`
pub(crate) fn builtin_hooks(config: &DbcpConfig) -> Vec<Hook> {
    let mut hooks = Vec::new();
    if let Some(threshold) = config.slow_acquire_threshold() {
        hooks.push(Hook::GetConnection(Arc::new(SlowAcquireLogger {
            pool: config.pool_name.clone(),
            threshold,
            stack_trace: config.log_stack_trace_for_long_create_connection,
        })));
    }
    if let Some(threshold) = config.slow_query_threshold() {
        hooks.push(Hook::StatementExecution(Arc::new(SlowQueryLogger {
            pool: config.pool_name.clone(),
            threshold,
            stack_trace: config.log_stack_trace_for_long_query_execution,
        })));
    }
    if let Some(threshold) = config.large_result_set_threshold() {
        hooks.push(Hook::ResultSetRetrieval(Arc::new(LargeResultSetLogger {
            pool: config.pool_name.clone(),
            threshold,
            stack_trace: config.log_stack_trace_for_large_result_set,
        })));
    }
    hooks
}

fn stack_trace(enabled: bool) -> Option<String> {
    enabled.then(|| Backtrace::force_capture().to_string())
}

fn format_params(params: &[BoundParam]) -> String {
    let rendered: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}

/// Warns when acquiring a connection took at least `threshold`
#[derive(Debug, Clone)]
pub struct SlowAcquireLogger {
    pub pool: String,
    pub threshold: Duration,
    pub stack_trace: bool,
}

#[async_trait]
impl GetConnectionHook for SlowAcquireLogger {
    async fn on_get(&self, raw: Option<&dyn RawConnection>, taken: Duration) -> Result<()> {
        if taken < self.threshold {
            return Ok(());
        }
        let trace = stack_trace(self.stack_trace);
        tracing::warn!(
            pool = %self.pool,
            elapsed_ms = taken.as_millis() as u64,
            acquired = raw.is_some(),
            stack_trace = trace.as_deref(),
            "acquiring a connection took longer than {:?}",
            self.threshold
        );
        Ok(())
    }
}

/// Warns when an execute call took at least `threshold`
#[derive(Debug, Clone)]
pub struct SlowQueryLogger {
    pub pool: String,
    pub threshold: Duration,
    pub stack_trace: bool,
}

#[async_trait]
impl StatementExecutionHook for SlowQueryLogger {
    async fn on_execute(
        &self,
        ctx: &ExecutionContext,
        proceed: StatementProceed<'_>,
    ) -> Result<ExecuteOutcome> {
        let started = Instant::now();
        let result = proceed.proceed().await;
        let elapsed = started.elapsed();

        if elapsed >= self.threshold {
            let params = ctx.params().map(format_params);
            let trace = stack_trace(self.stack_trace);
            tracing::warn!(
                pool = %self.pool,
                connection = %ctx.connection,
                sql = %ctx.sql,
                params = params.as_deref(),
                method = ctx.method.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                failed = result.is_err(),
                stack_trace = trace.as_deref(),
                "query execution took longer than {:?}",
                self.threshold
            );
        }
        result
    }
}

/// Warns when a result cursor yielded at least `threshold` rows
#[derive(Debug, Clone)]
pub struct LargeResultSetLogger {
    pub pool: String,
    pub threshold: u64,
    pub stack_trace: bool,
}

#[async_trait]
impl ResultSetRetrievalHook for LargeResultSetLogger {
    async fn on_retrieved(
        &self,
        sql: &str,
        params: Option<&[BoundParam]>,
        size: u64,
    ) -> Result<()> {
        if size < self.threshold {
            return Ok(());
        }
        let params = params.map(format_params);
        let trace = stack_trace(self.stack_trace);
        tracing::warn!(
            pool = %self.pool,
            sql = %sql,
            params = params.as_deref(),
            rows = size,
            stack_trace = trace.as_deref(),
            "result set larger than {} rows",
            self.threshold
        );
        Ok(())
    }
}
