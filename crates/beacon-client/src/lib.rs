//! # beacon-client
//!
//! Client event dispatcher for the Beacon event broker.
//!
//! Consumers subscribe to named events and receive payloads; the dispatcher
//! owns the transport underneath:
//!
//! - **WebSocket push** - preferred when configured and reachable
//! - **HTTP long-poll** - automatic fallback, permanent once selected
//!
//! Many logical event subscriptions are multiplexed onto one connection:
//! each event name becomes one channel filter entry, and filter changes are
//! coalesced into a single update.
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_client::{DispatcherConfig, EventDispatcher};
//!
//! # async fn example() {
//! let dispatcher = EventDispatcher::new(DispatcherConfig {
//!     websocket_url: Some("ws://127.0.0.1:15100".into()),
//!     poll_base_url: Some("http://127.0.0.1:15102".into()),
//!     auto_reconnect: true,
//!     ..DispatcherConfig::default()
//! });
//!
//! dispatcher.on("submissions", |payload| {
//!     println!("submission update: {payload}");
//! });
//! # }
//! ```

pub mod dispatcher;
pub mod events;
pub mod longpoll;
pub mod traits;
pub mod websocket;

pub use dispatcher::{CloseCallback, ConnectionState, DispatcherConfig, EventDispatcher};
pub use events::{EventCallback, EventRegistry};
pub use longpoll::HttpPoller;
pub use traits::{ClientError, PollBackend, PollReply, PushStream};
pub use websocket::WsStream;
