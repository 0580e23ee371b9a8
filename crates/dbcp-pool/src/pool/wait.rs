//! How long `take` may wait for a connection

use std::time::Duration;

/// Wait policy for taking a connection from the pool.
///
/// A configured timeout of zero means "wait forever"; asking for an
/// immediate failure requires the explicit [`Wait::NoWait`] sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    For(Duration),
    /// Fail at once unless a connection is available right now
    NoWait,
}

impl Wait {
    /// Interpret a millisecond timeout where `0` means forever
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Wait::Forever
        } else {
            Wait::For(Duration::from_millis(ms))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Wait::Forever => None,
            Wait::For(duration) => Some(*duration),
            Wait::NoWait => Some(Duration::ZERO),
        }
    }
}

impl From<Duration> for Wait {
    fn from(duration: Duration) -> Self {
        Wait::For(duration)
    }
}
