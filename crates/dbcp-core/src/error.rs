//! Error types for the connection pool

use std::time::Duration;

use thiserror::Error;

/// Core error type for pool, cache and driver operations
#[derive(Error, Debug)]
pub enum DbcpError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::de::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    /// No pooled connection became available within the requested wait.
    #[error("Timed out waiting for a pooled connection after {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// The connector could not produce a connection after exhausting all retries.
    #[error("Could not create a connection after {attempts} attempt(s): {source}")]
    CreationFailure {
        attempts: u32,
        #[source]
        source: Box<DbcpError>,
    },

    /// An operation was attempted on a closed handle or a terminated pool.
    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("Hook error: {0}")]
    Hook(String),

    /// Every failure raised while closing one handle, in the order they occurred.
    #[error("{} error(s) while closing: {}", .0.len(), join_messages(.0))]
    CloseAggregate(Vec<DbcpError>),
}

impl DbcpError {
    /// Whether this error means the physical connection can no longer be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            DbcpError::Connection(_) | DbcpError::Io(_) => true,
            DbcpError::CloseAggregate(errors) => errors.iter().any(DbcpError::is_connection_fatal),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DbcpError::AcquireTimeout { .. })
    }

    /// Flattens nested aggregates into the list of individual causes.
    pub fn into_causes(self) -> Vec<DbcpError> {
        match self {
            DbcpError::CloseAggregate(errors) => errors
                .into_iter()
                .flat_map(DbcpError::into_causes)
                .collect(),
            other => vec![other],
        }
    }
}

fn join_messages(errors: &[DbcpError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, DbcpError>;
