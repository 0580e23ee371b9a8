//! Ordered per-category hook lists

use std::sync::Arc;
use std::time::Duration;

use dbcp_core::{BoundParam, ExecuteOutcome, RawConnection, RawStatement, Result};
use parking_lot::RwLock;

use super::hook::{
    CloseConnectionHook, DestroyConnectionHook, ExecutionContext, GetConnectionHook, Hook,
    HookCategory, InitConnectionHook, MethodInvocationHook, ProxyTarget, ResultSetRetrievalHook,
    StatementExecutionHook, StatementProceed, ValidateConnectionHook,
};

#[derive(Default)]
struct HookLists {
    init: Vec<Arc<dyn InitConnectionHook>>,
    validate: Vec<Arc<dyn ValidateConnectionHook>>,
    get: Vec<Arc<dyn GetConnectionHook>>,
    close: Vec<Arc<dyn CloseConnectionHook>>,
    destroy: Vec<Arc<dyn DestroyConnectionHook>>,
    invocation: Vec<Arc<dyn MethodInvocationHook>>,
    execution: Vec<Arc<dyn StatementExecutionHook>>,
    retrieval: Vec<Arc<dyn ResultSetRetrievalHook>>,
}

/// Registered hooks, one ordered list per category.
///
/// Invocation snapshots the list first, so a hook registered while a chain
/// is running only takes part in later events.
#[derive(Default)]
pub struct HookRegistry {
    lists: RwLock<HookLists>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to the end of its category's list
    pub fn register(&self, hook: Hook) {
        tracing::debug!(category = %hook.category(), "registering hook");
        let mut lists = self.lists.write();
        match hook {
            Hook::InitConnection(h) => lists.init.push(h),
            Hook::ValidateConnection(h) => lists.validate.push(h),
            Hook::GetConnection(h) => lists.get.push(h),
            Hook::CloseConnection(h) => lists.close.push(h),
            Hook::DestroyConnection(h) => lists.destroy.push(h),
            Hook::MethodInvocation(h) => lists.invocation.push(h),
            Hook::StatementExecution(h) => lists.execution.push(h),
            Hook::ResultSetRetrieval(h) => lists.retrieval.push(h),
        }
    }

    /// Number of hooks registered for a category
    pub fn len(&self, category: HookCategory) -> usize {
        let lists = self.lists.read();
        match category {
            HookCategory::InitConnection => lists.init.len(),
            HookCategory::ValidateConnection => lists.validate.len(),
            HookCategory::GetConnection => lists.get.len(),
            HookCategory::CloseConnection => lists.close.len(),
            HookCategory::DestroyConnection => lists.destroy.len(),
            HookCategory::MethodInvocation => lists.invocation.len(),
            HookCategory::StatementExecution => lists.execution.len(),
            HookCategory::ResultSetRetrieval => lists.retrieval.len(),
        }
    }

    pub fn is_empty(&self, category: HookCategory) -> bool {
        self.len(category) == 0
    }

    pub async fn on_init(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()> {
        let hooks = self.lists.read().init.clone();
        for hook in hooks {
            hook.on_init(raw, taken).await?;
        }
        Ok(())
    }

    pub async fn on_validate(&self, raw: &dyn RawConnection, idle: Duration) -> Result<()> {
        let hooks = self.lists.read().validate.clone();
        for hook in hooks {
            hook.on_validate(raw, idle).await?;
        }
        Ok(())
    }

    pub async fn on_get(&self, raw: Option<&dyn RawConnection>, taken: Duration) -> Result<()> {
        let hooks = self.lists.read().get.clone();
        for hook in hooks {
            hook.on_get(raw, taken).await?;
        }
        Ok(())
    }

    pub async fn on_close(&self, raw: &dyn RawConnection, taken: Duration) -> Result<()> {
        let hooks = self.lists.read().close.clone();
        for hook in hooks {
            hook.on_close(raw, taken).await?;
        }
        Ok(())
    }

    pub async fn on_destroy(&self, raw: &dyn RawConnection, took: Duration) {
        let hooks = self.lists.read().destroy.clone();
        for hook in hooks {
            hook.on_destroy(raw, took).await;
        }
    }

    pub async fn on_invoke(&self, target: ProxyTarget, method: &str) -> Result<()> {
        let hooks = self.lists.read().invocation.clone();
        for hook in hooks {
            hook.on_invoke(target, method).await?;
        }
        Ok(())
    }

    /// Run the execution chain around `target`'s real execute call
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        target: &dyn RawStatement,
    ) -> Result<ExecuteOutcome> {
        let chain = self.lists.read().execution.clone();
        StatementProceed::new(&chain, target, ctx).proceed().await
    }

    pub async fn on_retrieved(
        &self,
        sql: &str,
        params: Option<&[BoundParam]>,
        size: u64,
    ) -> Result<()> {
        let hooks = self.lists.read().retrieval.clone();
        for hook in hooks {
            hook.on_retrieved(sql, params, size).await?;
        }
        Ok(())
    }
}
