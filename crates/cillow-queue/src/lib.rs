// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use cillow_protocol::ClientId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

/// One queued unit of work: the originating client and the raw request body.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Identity of the client that sent the request.
    pub client_id: ClientId,
    /// The undecoded request body.
    pub body: Bytes,
}

/// Errors returned by [`RequestQueue::try_push`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has reached its maximum capacity.
    #[error("Server request queue is full. Try again later.")]
    Full {
        /// Maximum number of items the queue can hold.
        max: usize,
    },
}

/// A bounded FIFO with a nonblocking producer side and a timed consumer side.
///
/// Producers never wait: an overflow is reported immediately so the caller
/// can answer the client instead of stalling the socket reader. Consumers
/// poll with a timeout so they re-check the stop signal between items.
pub struct RequestQueue {
    entries: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
    notify: Notify,
}

impl RequestQueue {
    /// Create a queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Append an item without blocking.
    pub fn try_push(&self, item: QueueItem) -> Result<(), QueueError> {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                return Err(QueueError::Full { max: self.capacity });
            }
            entries.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the oldest item, waiting up to `wait` for one to arrive.
    ///
    /// Returns `None` on timeout. Safe for multiple concurrent consumers: a
    /// woken consumer that loses the race simply waits out its remaining
    /// budget.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a push between the check
            // and the await cannot be lost.
            notified.as_mut().enable();

            if let Some(item) = self.entries.lock().pop_front() {
                return Some(item);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return self.entries.lock().pop_front();
            }
        }
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
