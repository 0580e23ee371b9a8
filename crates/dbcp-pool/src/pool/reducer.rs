//! Background pool reducer
//!
//! Every `interval` the reducer samples the taken count `samples` times,
//! evenly spaced. Afterwards it destroys idle connections beyond the
//! highest sampled demand, never going below the initial size.

use std::sync::{Arc, Weak};
use std::time::Duration;

use super::engine::ConnectionPool;

impl ConnectionPool {
    /// Spawn the reducer task if the configuration enables it.
    ///
    /// The task holds only a weak reference and ends once the pool is
    /// terminated or dropped.
    pub fn start_reducer(self: &Arc<Self>) {
        let Some(interval) = self.config().reducer_interval() else {
            return;
        };
        let samples = self.config().reducer_samples.max(1);
        let handle = tokio::spawn(run_reducer(Arc::downgrade(self), interval, samples));
        if let Some(previous) = self.reducer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// One reduction pass given the highest taken count seen while sampling
    pub async fn reduce(&self, max_taken: usize) -> usize {
        let target = self.config().initial_size().max(max_taken);
        let destroyed = self.shrink_to(target).await;
        if destroyed > 0 {
            tracing::debug!(
                pool = %self.config().name(),
                destroyed,
                max_taken,
                remaining = self.created_count(),
                "reducer destroyed idle connections"
            );
        }
        destroyed
    }
}

async fn run_reducer(pool: Weak<ConnectionPool>, interval: Duration, samples: u32) {
    let period = interval / samples;
    loop {
        let mut max_taken = 0;
        for _ in 0..samples {
            tokio::time::sleep(period).await;
            let Some(pool) = pool.upgrade() else {
                return;
            };
            if pool.is_terminated() {
                return;
            }
            max_taken = max_taken.max(pool.taken_count());
        }

        let Some(pool) = pool.upgrade() else {
            return;
        };
        pool.reduce(max_taken).await;
    }
}
