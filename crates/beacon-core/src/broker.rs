//! The event broker: bounded log, push subscribers, pending long-polls.
//!
//! One `Broker` instance owns all distribution state behind a single lock.
//! A publish appends to the log and offers the new message to every matching
//! follower queue and pending poll in the same critical section, which is
//! what makes the per-subscriber ordering guarantee hold: ids are assigned
//! and fanned out atomically, so no subscriber can observe id N after N+1,
//! a duplicate, or a gap among retained messages.
//!
//! Fan-out never blocks: follower queues are bounded drop-oldest
//! ([`DeliveryQueue`]), and poll responders are oneshot sends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use beacon_protocol::{Message, MessageId};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::delivery::{DeliveryQueue, DEFAULT_OUTBOUND_CAPACITY};
use crate::log::{MessageLog, DEFAULT_MAX_QUEUE};

/// Default cap on channels per subscription filter.
pub const DEFAULT_MAX_FILTER: usize = 5;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Filter is empty or names more channels than `max_filter` allows.
    #[error("invalid filter: {0}")]
    InvalidFilter(&'static str),

    /// The follower id is not registered (already deregistered).
    #[error("unknown subscriber")]
    UnknownSubscriber,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Log capacity (`maxQueue`).
    pub max_queue: usize,
    /// Maximum channels per subscription filter (`maxFilter`).
    pub max_filter: usize,
    /// Per-follower outbound queue capacity.
    pub outbound_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_queue: DEFAULT_MAX_QUEUE,
            max_filter: DEFAULT_MAX_FILTER,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Identifier of a push-subscriber registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FollowerId(u64);

/// Identifier of a pending long-poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollerId(u64);

/// Handle returned to the subscriber connection on registration.
#[derive(Debug, Clone)]
pub struct FollowerRegistration {
    /// Registration id, used for filter replacement and deregistration.
    pub id: FollowerId,
    /// The connection's outbound delivery queue.
    pub queue: Arc<DeliveryQueue>,
}

/// Outcome of a long-poll request.
#[derive(Debug)]
pub enum PollOutcome {
    /// A buffered message matched immediately.
    Ready(Arc<Message>),
    /// No match yet; the caller parks on the ticket.
    Pending(PollTicket),
}

/// A parked long-poll: resolved by the next matching publish, or cancelled.
#[derive(Debug)]
pub struct PollTicket {
    /// Pending-poll id, for cancellation.
    pub id: PollerId,
    /// Resolves with the first matching message.
    pub receiver: oneshot::Receiver<Arc<Message>>,
}

/// Broker statistics.
#[derive(Debug, Clone, Copy)]
pub struct BrokerStats {
    /// Registered push subscribers.
    pub followers: usize,
    /// Parked long-polls.
    pub pending_polls: usize,
    /// Messages currently retained in the log.
    pub buffered: usize,
}

struct Follower {
    filter: HashSet<String>,
    last_delivered: MessageId,
    queue: Arc<DeliveryQueue>,
}

struct PendingPoll {
    channels: HashSet<String>,
    responder: oneshot::Sender<Arc<Message>>,
}

struct BrokerInner {
    log: MessageLog,
    followers: HashMap<FollowerId, Follower>,
    pollers: HashMap<PollerId, PendingPoll>,
    next_follower: u64,
    next_poller: u64,
}

/// The central event broker.
pub struct Broker {
    inner: Mutex<BrokerInner>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker with a wall-clock-seeded id counter.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let log = MessageLog::new(config.max_queue);
        Self::with_log(config, log)
    }

    /// Create a broker whose first message id will be `start_id + 1`.
    ///
    /// Deterministic ids for tests and for embedders that persist their own
    /// baseline.
    #[must_use]
    pub fn with_start_id(config: BrokerConfig, start_id: MessageId) -> Self {
        let log = MessageLog::with_start_id(config.max_queue, start_id);
        Self::with_log(config, log)
    }

    fn with_log(config: BrokerConfig, log: MessageLog) -> Self {
        debug!(
            max_queue = config.max_queue,
            max_filter = config.max_filter,
            outbound = config.outbound_capacity,
            "Creating broker"
        );
        Self {
            inner: Mutex::new(BrokerInner {
                log,
                followers: HashMap::new(),
                pollers: HashMap::new(),
                next_follower: 0,
                next_poller: 0,
            }),
            config,
        }
    }

    /// Publish a payload to a channel and return the assigned id.
    ///
    /// The new message is offered once to every follower and every pending
    /// poll whose filter matches; neither path blocks on the consumer.
    pub fn publish(&self, channel: &str, payload: &str) -> MessageId {
        let mut inner = self.inner.lock();
        let message = inner.log.append(channel, payload);
        let id = message.id;

        for follower in inner.followers.values_mut() {
            offer(follower, &message);
        }

        let matched: Vec<PollerId> = inner
            .pollers
            .iter()
            .filter(|(_, poll)| poll.channels.contains(channel))
            .map(|(id, _)| *id)
            .collect();
        for poller_id in matched {
            if let Some(poll) = inner.pollers.remove(&poller_id) {
                // A dropped receiver just means the poller went away first.
                let _ = poll.responder.send(Arc::clone(&message));
            }
        }

        trace!(id, channel, "Published");
        id
    }

    /// The most recently assigned message id.
    #[must_use]
    pub fn last_id(&self) -> MessageId {
        self.inner.lock().log.last_id()
    }

    /// Register a push subscriber with a catch-up baseline and a filter.
    ///
    /// Retained messages with `id > start` are replayed through the filter
    /// before the registration goes live, so the subscriber sees no gap
    /// between catch-up and fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidFilter`] if the filter is empty or
    /// names more than `max_filter` channels; nothing is registered.
    pub fn register(
        &self,
        start: MessageId,
        filter: Vec<String>,
    ) -> Result<FollowerRegistration, BrokerError> {
        let filter = self.validate_filter(filter)?;
        let queue = DeliveryQueue::new(self.config.outbound_capacity);

        let mut inner = self.inner.lock();
        inner.next_follower += 1;
        let id = FollowerId(inner.next_follower);

        let mut follower = Follower {
            filter,
            last_delivered: start,
            queue: Arc::clone(&queue),
        };
        catch_up(&inner.log, &mut follower);
        inner.followers.insert(id, follower);

        debug!(follower = id.0, start, "Subscriber registered");
        Ok(FollowerRegistration { id, queue })
    }

    /// Replace a follower's filter and re-run catch-up from its current
    /// delivery position.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidFilter`] on a bad filter (the previous
    /// registration stays active) or [`BrokerError::UnknownSubscriber`] for
    /// a stale id.
    pub fn replace_filter(&self, id: FollowerId, filter: Vec<String>) -> Result<(), BrokerError> {
        let filter = self.validate_filter(filter)?;

        let mut inner = self.inner.lock();
        let BrokerInner { log, followers, .. } = &mut *inner;
        let follower = followers.get_mut(&id).ok_or(BrokerError::UnknownSubscriber)?;
        follower.filter = filter;
        catch_up(log, follower);

        debug!(follower = id.0, "Filter replaced");
        Ok(())
    }

    /// Move a follower's delivery baseline, as a late `start-msg` does.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownSubscriber`] for a stale id.
    pub fn set_start(&self, id: FollowerId, start: MessageId) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        let follower = inner
            .followers
            .get_mut(&id)
            .ok_or(BrokerError::UnknownSubscriber)?;
        follower.last_delivered = start;
        Ok(())
    }

    /// Remove a registration and close its delivery queue.
    pub fn deregister(&self, id: FollowerId) {
        let removed = self.inner.lock().followers.remove(&id);
        if let Some(follower) = removed {
            follower.queue.close();
            debug!(follower = id.0, dropped = follower.queue.dropped(), "Subscriber deregistered");
        }
    }

    /// Answer a long-poll: the oldest retained message with `id > last` and
    /// a matching channel, or a ticket to park on.
    pub fn poll(&self, channels: HashSet<String>, last: MessageId) -> PollOutcome {
        let mut inner = self.inner.lock();

        for message in inner.log.iter() {
            if message.id > last && channels.contains(&message.channel) {
                return PollOutcome::Ready(Arc::clone(message));
            }
        }

        let (responder, receiver) = oneshot::channel();
        inner.next_poller += 1;
        let id = PollerId(inner.next_poller);
        inner.pollers.insert(id, PendingPoll { channels, responder });

        trace!(poller = id.0, last, "Poll parked");
        PollOutcome::Pending(PollTicket { id, receiver })
    }

    /// Drop a pending poll. Idempotent: resolving a poll already removed it.
    pub fn cancel_poll(&self, id: PollerId) {
        if self.inner.lock().pollers.remove(&id).is_some() {
            trace!(poller = id.0, "Poll cancelled");
        }
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let inner = self.inner.lock();
        BrokerStats {
            followers: inner.followers.len(),
            pending_polls: inner.pollers.len(),
            buffered: inner.log.len(),
        }
    }

    fn validate_filter(&self, filter: Vec<String>) -> Result<HashSet<String>, BrokerError> {
        if filter.is_empty() {
            return Err(BrokerError::InvalidFilter("empty filter"));
        }
        if filter.len() > self.config.max_filter {
            return Err(BrokerError::InvalidFilter("too many channels"));
        }
        Ok(filter.into_iter().collect())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Offer one message to a follower: deliver if the channel matches, and
/// advance the delivery baseline either way so a later filter change does
/// not replay messages the follower already had a chance at.
fn offer(follower: &mut Follower, message: &Arc<Message>) {
    if follower.filter.contains(&message.channel) {
        follower.queue.push(Arc::clone(message));
    }
    follower.last_delivered = message.id;
}

fn catch_up(log: &MessageLog, follower: &mut Follower) {
    for message in log.iter() {
        if message.id > follower.last_delivered {
            offer(follower, message);
        }
    }
}
