// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! External cancellation.
//!
//! Checked by the dispatcher before each primitive dispatch, and at the
//! suspension points inside `wait`, navigation, and cognition. A fired
//! signal surfaces as `Error::Cancelled`, which propagates through any
//! `handle` that doesn't explicitly catch it; `finally` clauses still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A cheap, cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    /// A signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` if the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
