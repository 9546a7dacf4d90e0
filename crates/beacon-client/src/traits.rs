//! Transport abstraction traits for the client dispatcher.
//!
//! The dispatcher's connection loops are written against these traits, not
//! concrete sockets, so the reconnect and coalescing behavior can be tested
//! with in-memory transports.

use async_trait::async_trait;
use beacon_protocol::{Message, MessageId};
use thiserror::Error;

/// Client transport errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The connection dropped mid-operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send a command.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A request could not be completed.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The server answered with something unparseable.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// A bidirectional push connection carrying JSON text frames.
#[async_trait]
pub trait PushStream: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Receive the next text frame.
    ///
    /// Returns `None` when the connection closes cleanly.
    async fn next(&mut self) -> Result<Option<String>, ClientError>;

    /// Close the connection. Best effort.
    async fn close(&mut self);
}

/// Outcome of one long-poll round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// The server delivered a message.
    Message(Message),
    /// The hold timed out with nothing to deliver. Expected; re-poll.
    TimedOut,
}

/// A one-shot long-poll requester.
#[async_trait]
pub trait PollBackend: Send + Sync {
    /// Issue one poll for the pipe-delimited channel set, resuming after
    /// `last`.
    async fn poll(&self, channels: &str, last: MessageId) -> Result<PollReply, ClientError>;
}
