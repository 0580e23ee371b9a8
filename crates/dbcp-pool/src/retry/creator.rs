//! Physical connection creation with retry

use std::sync::Arc;
use std::time::{Duration, Instant};

use dbcp_core::{ConnectOptions, Connector, DbcpError, RawConnection, Result};

use super::BackoffStrategy;

/// A freshly opened physical connection
pub struct Created {
    pub raw: Arc<dyn RawConnection>,
    /// Time spent across every attempt, including retry sleeps
    pub elapsed: Duration,
    /// Number of connect calls made, including the successful one
    pub attempts: u32,
}

/// Opens physical connections through a [`Connector`], retrying failures
pub struct ConnectionCreator {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    /// Retries after the first failed attempt
    retry_attempts: u32,
    backoff: BackoffStrategy,
}

impl ConnectionCreator {
    pub fn new(
        connector: Arc<dyn Connector>,
        options: ConnectOptions,
        retry_attempts: u32,
        backoff: BackoffStrategy,
    ) -> Self {
        Self {
            connector,
            options,
            retry_attempts,
            backoff,
        }
    }

    pub fn driver_name(&self) -> &str {
        self.connector.driver_name()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Connect, making at most `1 + retry_attempts` attempts.
    ///
    /// The caller's own wait timeout does not bound this sequence.
    pub async fn create(&self) -> Result<Created> {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.connector.connect(&self.options).await {
                Ok(raw) => {
                    return Ok(Created {
                        raw,
                        elapsed: started.elapsed(),
                        attempts,
                    });
                }
                Err(e) if attempts <= self.retry_attempts => {
                    let delay = self.backoff.calculate_delay(attempts - 1);
                    tracing::debug!(
                        driver = %self.driver_name(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        driver = %self.driver_name(),
                        attempts,
                        error = %e,
                        "could not create connection"
                    );
                    return Err(DbcpError::CreationFailure {
                        attempts,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
