//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Snapshot of a connection pool's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Physical connections currently owned by the pool (idle + taken)
    created: usize,
    /// Connections sitting in the idle set
    idle: usize,
    /// Connections handed out to callers
    taken: usize,
    /// Callers waiting for a connection
    waiting: usize,
    /// Configured maximum
    max: usize,
}

impl PoolStats {
    pub fn new(created: usize, idle: usize, taken: usize, waiting: usize, max: usize) -> Self {
        Self {
            created,
            idle,
            taken,
            waiting,
            max,
        }
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn taken(&self) -> usize {
        self.taken
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Share of the maximum currently taken (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.taken as f64 / self.max as f64
        }
    }

    /// Every allowed connection is taken
    pub fn is_exhausted(&self) -> bool {
        self.taken >= self.max
    }

    /// Connections that could still be handed out without waiting
    pub fn remaining_capacity(&self) -> usize {
        self.max.saturating_sub(self.taken)
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0, 0)
    }
}
