//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon event broker.
//!
//! Every endpoint speaks JSON text frames. This crate defines the shared
//! message record, the per-endpoint command sets, the response envelopes,
//! and the decode/encode helpers with the broker's error taxonomy.
//!
//! ## Commands
//!
//! - Publisher endpoint: `post`, `last-msg`
//! - Subscriber endpoint: `start-msg`, `set-filter`
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, PublisherCommand};
//!
//! let cmd = codec::decode_publisher(r#"{"command":"post","channel":"c","message":"m"}"#).unwrap();
//! assert!(matches!(cmd, PublisherCommand::Post { .. }));
//! ```

pub mod codec;
pub mod commands;
pub mod message;

pub use codec::{decode_publisher, decode_subscriber, encode, ProtocolError};
pub use commands::{PublisherCommand, Response, SubscriberCommand};
pub use message::{Message, MessageId};
