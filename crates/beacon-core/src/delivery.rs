//! Per-connection outbound delivery queue.
//!
//! Fan-out must never stall the publisher on a slow consumer, so every push
//! subscriber gets a bounded queue with a drop-oldest overflow policy:
//! `push` always completes immediately, and a consumer that falls more than
//! `capacity` messages behind loses the oldest undelivered ones first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use beacon_protocol::Message;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// A bounded single-consumer queue of pending deliveries.
#[derive(Debug)]
pub struct DeliveryQueue {
    inner: Mutex<VecDeque<Arc<Message>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` undelivered messages.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue a message without blocking, evicting the oldest pending
    /// delivery if the queue is full.
    pub fn push(&self, message: Arc<Message>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.inner.lock();
            if queue.len() == self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Wait for the next pending delivery.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        loop {
            // Arm the notification before checking state so a push between
            // the check and the await cannot be lost.
            let notified = self.notify.notified();
            if let Some(message) = self.inner.lock().pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue, waking a parked consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Messages evicted because the consumer fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages currently waiting for the consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether anything is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
