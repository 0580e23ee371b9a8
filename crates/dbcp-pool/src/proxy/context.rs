//! Collaborators shared by every handle of one data source

use std::sync::Arc;

use crate::cache::StatementCache;
use crate::config::{ConnectionDefaults, DbcpConfig};
use crate::hooks::HookRegistry;
use crate::pool::ConnectionPool;

pub(crate) struct ProxyContext {
    pub pool: Arc<ConnectionPool>,
    pub cache: Arc<StatementCache>,
    pub hooks: Arc<HookRegistry>,
    /// Attributes restored on every close, if resetting is enabled
    pub reset_defaults: Option<ConnectionDefaults>,
    pub include_params: bool,
}

impl ProxyContext {
    pub fn new(
        config: &DbcpConfig,
        pool: Arc<ConnectionPool>,
        cache: Arc<StatementCache>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let defaults = config.connection_defaults();
        let reset_defaults =
            (config.reset_defaults_after_use && !defaults.is_empty()).then_some(defaults);

        Self {
            pool,
            cache,
            hooks,
            reset_defaults,
            include_params: config.include_query_parameters,
        }
    }
}
