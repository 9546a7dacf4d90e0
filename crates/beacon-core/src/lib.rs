//! # beacon-core
//!
//! Bounded message log and fan-out broker for the Beacon event broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **MessageLog** - Capacity-limited sliding window of recent messages
//! - **Broker** - Publish, catch-up replay, push fan-out, long-poll matching
//! - **DeliveryQueue** - Bounded per-connection outbound queue (drop-oldest)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  Publisher  │────▶│   Broker    │────▶│ DeliveryQueue │──▶ push socket
//! └─────────────┘     └──────┬──────┘     └───────────────┘
//!                            │
//!                     ┌──────▼──────┐     ┌───────────────┐
//!                     │ MessageLog  │     │ PendingPoll   │──▶ HTTP response
//!                     └─────────────┘     └───────────────┘
//! ```

pub mod broker;
pub mod delivery;
pub mod log;

pub use broker::{
    Broker, BrokerConfig, BrokerError, BrokerStats, FollowerId, FollowerRegistration, PollOutcome,
    PollTicket, PollerId,
};
pub use delivery::DeliveryQueue;
pub use log::MessageLog;
