//! The published message record.
//!
//! This is the one type that crosses every boundary in the system: it is
//! appended to the broker's log, queued for push subscribers, handed to
//! long-poll responders, and serialized verbatim as the delivery body.

use serde::{Deserialize, Serialize};

/// A message identifier.
///
/// Ids are assigned from a single per-broker counter and are strictly
/// increasing for the lifetime of the process. The counter is seeded from
/// wall-clock time at startup, so ids are not reused across quick restarts
/// in practice, but nothing enforces cross-restart uniqueness.
pub type MessageId = u64;

/// A published message.
///
/// The wire form is `{"id":…,"channel":…,"message":…}` on every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned identifier.
    pub id: MessageId,
    /// Channel tag used for subscriber filtering.
    pub channel: String,
    /// Opaque textual payload.
    #[serde(rename = "message")]
    pub payload: String,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(id: MessageId, channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}
