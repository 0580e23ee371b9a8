//! When an idle connection must be validated before it is handed out

use std::time::Duration;

/// Validation policy derived from `connectionIdleLimitInSeconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Negative idle limit
    Never,
    /// Idle limit of zero
    Always,
    /// Validate once a connection stayed idle at least this long
    IdleFor(Duration),
}

impl ValidationPolicy {
    pub fn from_idle_limit_secs(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => ValidationPolicy::Never,
            0 => ValidationPolicy::Always,
            s => ValidationPolicy::IdleFor(Duration::from_secs(s as u64)),
        }
    }

    pub fn requires_validation(&self, idle: Duration) -> bool {
        match self {
            ValidationPolicy::Never => false,
            ValidationPolicy::Always => true,
            ValidationPolicy::IdleFor(limit) => idle >= *limit,
        }
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy::IdleFor(Duration::from_secs(60))
    }
}
