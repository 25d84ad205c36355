//! Cooperative cancellation for long-running conversations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// A shared cancellation flag, checked at every suspension point of the
/// protocol engines. Triggering it makes the current operation fail with
/// [`Error::Cancelled`] at its next check; all transports, spools and caches
/// are released on the way out.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a new, untriggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from any thread, including signal
    /// handlers via a pre-registered clone.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with [`Error::Cancelled`] once triggered.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
