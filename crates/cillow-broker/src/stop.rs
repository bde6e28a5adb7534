// SPDX-License-Identifier: MIT OR Apache-2.0
//! One-shot stop signal shared by every broker loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cooperative shutdown signal.
///
/// Cloneable and backed by an `Arc`; cancelling any clone wakes all
/// waiters. Every loop in the broker observes it at its next poll
/// boundary.
#[derive(Clone, Default)]
pub struct StopToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopToken {
    /// Create a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown to all waiters.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns `true` once shutdown has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is signalled; returns immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
