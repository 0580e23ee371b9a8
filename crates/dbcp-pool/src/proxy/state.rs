//! Close state shared by every handle kind

use std::sync::atomic::{AtomicU8, Ordering};

use dbcp_core::{DbcpError, Result};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Open/closing/closed flag of one handle.
///
/// Only the caller that moves the state from open to closing performs the
/// real close; every other close call returns at once.
#[derive(Debug)]
pub struct ProxyState {
    state: AtomicU8,
}

impl ProxyState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == OPEN
    }

    /// Closing or closed
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    pub fn ensure_open(&self, what: &'static str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DbcpError::Closed(what))
        }
    }

    /// Claim the close; true only for the first caller
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish_close(&self) {
        self.state.store(CLOSED, Ordering::SeqCst);
    }
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors collected while a close sequence keeps going
#[derive(Debug, Default)]
pub(crate) struct CloseErrors(Vec<DbcpError>);

impl CloseErrors {
    pub fn push(&mut self, error: DbcpError) {
        self.0.push(error);
    }

    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.0.extend(error.into_causes());
                None
            }
        }
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = DbcpError>) {
        self.0.extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok` when nothing failed, otherwise one aggregate of every cause
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(DbcpError::CloseAggregate(self.0))
        }
    }
}
