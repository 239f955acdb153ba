//! Cooperative cancellation for in-flight scans.
//!
//! When a query's LIMIT is satisfied (or its cursor is dropped), the groups
//! still fetching rows must stop without waiting for natural exhaustion.
//! Workers poll the signal between row fetches and between sub-scans; the
//! cursor fires it once. A shared flag is all this takes: the only blocking
//! wait in the pipeline is the bounded stream channel, and the cursor
//! unblocks that by dropping its receivers at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag shared by the merge driver and every group worker of
/// one query.
///
/// Cloning shares the underlying state: one clone per group worker, one
/// held by the cursor, and optionally one by the caller for external
/// cancellation.
#[derive(Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create a new signal in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
