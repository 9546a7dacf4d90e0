//! The bounded message log.
//!
//! An append-only sliding window over the most recent messages. Capacity is
//! enforced silently by FIFO eviction, never by rejection. The log is not
//! internally synchronized; the [`Broker`](crate::Broker) owns it behind its
//! lock, which is what gives concurrent readers a consistent snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use beacon_protocol::{Message, MessageId};

/// Default log capacity.
pub const DEFAULT_MAX_QUEUE: usize = 50;

/// An ordered, capacity-limited sequence of published messages, oldest first.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<Arc<Message>>,
    capacity: usize,
    last_id: MessageId,
}

impl MessageLog {
    /// Create a log with the given capacity.
    ///
    /// The id counter is seeded from wall-clock milliseconds, so ids from a
    /// restarted process land above those of earlier runs under normal
    /// clocks. Monotonicity is only guaranteed within one process lifetime.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_start_id(capacity, seed)
    }

    /// Create a log whose first assigned id will be `start_id + 1`.
    #[must_use]
    pub fn with_start_id(capacity: usize, start_id: MessageId) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            last_id: start_id,
        }
    }

    /// Append a message, assigning it the next id.
    ///
    /// Evicts the oldest entry when the log is over capacity.
    pub fn append(&mut self, channel: impl Into<String>, payload: impl Into<String>) -> Arc<Message> {
        self.last_id += 1;
        let message = Arc::new(Message::new(self.last_id, channel, payload));
        self.entries.push_back(Arc::clone(&message));
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        message
    }

    /// The most recently assigned id (the seed if nothing was appended yet).
    #[must_use]
    pub fn last_id(&self) -> MessageId {
        self.last_id
    }

    /// Iterate the retained messages, oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.entries.iter()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log currently retains nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
