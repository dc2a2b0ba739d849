//! Unbounded Hand-Off Channel
//!
//! This module provides the ordered, closable async queue that carries
//! message fragments from a subscription callback to the consuming
//! sequence. It is the one concurrency primitive the streaming layer is
//! built on:
//!
//! - Writers never block: the queue is unbounded by design, so a slow
//!   consumer (a UI repainting, a paused task) can never stall the
//!   transport callback that feeds it.
//! - Closing is an explicit, idempotent signal. Any holder of a clone may
//!   close the channel: the subscription pump closes it on completion, the
//!   reconnect hook force-closes every registered channel, and cancellation
//!   closes it to break the consumer out of a blocked read.
//! - A closed channel still drains: items written before the close are
//!   delivered in order, then the channel yields `None` forever.
//!
//! # Consumer model
//!
//! One logical consumer per channel. Clones share the same queue and exist
//! so that *other* parties can write to or close the channel, not so that
//! several tasks can compete for items. `recv` wakes at most one blocked
//! reader per event.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Shared state behind every clone of a [`Channel`].
struct Shared<T> {
    /// FIFO queue of pending items.
    queue: Mutex<VecDeque<T>>,
    /// Set once by the first successful `close`; never cleared.
    closed: AtomicBool,
    /// Wakes a reader blocked in `recv` after a write or a close.
    notify: Notify,
}

/// An unbounded, ordered, closable async queue.
///
/// Created fresh for every subscription attempt, written to by the
/// transport side, read by exactly one consuming loop, and closed by
/// whichever side ends the attempt first (completion, drop, reconnect, or
/// cancellation). Never reused across attempts.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Channel<T> {
    /// Create an open, empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Append an item to the queue.
    ///
    /// Returns `true` if the item was enqueued, `false` if the channel was
    /// already closed (the item is dropped). Never blocks.
    pub fn write(&self, item: T) -> bool {
        let mut queue = self.shared.queue.lock();
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        queue.push_back(item);
        drop(queue);
        self.shared.notify.notify_one();
        true
    }

    /// Close the channel.
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition, so callers can tell whether they actually closed it.
    /// A blocked reader is woken and will drain any remaining items before
    /// observing the end of the sequence.
    pub fn close(&self) -> bool {
        // Taken so a concurrent `write` lands strictly before or strictly
        // after the close, never half-way.
        let queue = self.shared.queue.lock();
        let newly_closed = !self.shared.closed.swap(true, Ordering::AcqRel);
        drop(queue);
        if newly_closed {
            self.shared.notify.notify_one();
        }
        newly_closed
    }

    /// Receive the next item in FIFO order.
    ///
    /// Suspends while the channel is empty and open. After a close, any
    /// queued items are still delivered in order; once drained, every call
    /// returns `None`.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if let Some(item) = queue.pop_front() {
                    return Some(item);
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Whether two handles share the same underlying queue.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
