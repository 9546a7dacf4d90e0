//! Command and response types for the two message-oriented endpoints.
//!
//! Both endpoints speak JSON text frames carrying a `"command"` field.
//! Dashes in command names are normalized to underscores before dispatch,
//! so `"last-msg"` and `"last_msg"` are the same command.

use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// A command accepted by the subscriber push endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberCommand {
    /// Set the catch-up baseline: only messages with a greater id are
    /// replayed when a filter is registered.
    StartMsg { start: MessageId },
    /// Declare the channel filter. Bounds (non-empty, at most `max_filter`
    /// entries) are enforced by the broker, not the parser.
    SetFilter { filter: Vec<String> },
}

/// A command accepted by the publisher endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherCommand {
    /// Publish a payload to a channel.
    Post { channel: String, payload: String },
    /// Ask for the most recently assigned message id.
    LastMsg,
}

/// A status envelope sent back on the command connection.
///
/// Successful `set-filter` registrations are silent; everything else that a
/// command endpoint says about a command is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "success")]
    Success { id: MessageId },
    #[serde(rename = "error")]
    Error {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Response {
    /// Create a success response carrying a message id.
    #[must_use]
    pub fn success(id: MessageId) -> Self {
        Response::Success { id }
    }

    /// Create an error response with a code and human-readable message.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    /// Create an error response with a code only.
    ///
    /// The original publisher rejects a non-string channel with a bare
    /// `{"status":"error","code":"invalid-channel"}` body.
    #[must_use]
    pub fn error_code(code: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(Response::success(41)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "success", "id": 41}));
    }

    #[test]
    fn test_error_envelope_with_message() {
        let json = serde_json::to_value(Response::error("invalid-filter", "invalid filter")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "error",
                "code": "invalid-filter",
                "message": "invalid filter"
            })
        );
    }

    #[test]
    fn test_bare_error_omits_message() {
        let json = serde_json::to_string(&Response::error_code("invalid-channel")).unwrap();
        assert!(!json.contains("message"));
    }
}
