//! Decoding of incoming command frames and encoding of outgoing bodies.
//!
//! Framing is plain JSON text: one command or response per WebSocket text
//! frame, no length prefix. Decoding goes through `serde_json::Value` first
//! because the error taxonomy depends on *where* parsing fails: a body that
//! is not JSON at all is a syntax error, while a well-formed `set-filter`
//! whose `filter` field has the wrong shape is an invalid-filter error.

use serde_json::Value;
use thiserror::Error;

use crate::commands::{PublisherCommand, Response, SubscriberCommand};

/// Wire error codes.
pub mod codes {
    pub const SYNTAX_ERROR: &str = "syntax-error";
    pub const BAD_COMMAND: &str = "bad-command";
    pub const INVALID_FILTER: &str = "invalid-filter";
    pub const INVALID_CHANNEL: &str = "invalid-channel";
}

/// Errors produced while decoding a command frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Body is not valid JSON, has no usable `command`, or carries a
    /// malformed argument (e.g. a non-integer `start`).
    #[error("syntax error")]
    SyntaxError,

    /// Body exceeds the configured size cap.
    #[error("request entity too large: {0} bytes")]
    BodyTooLarge(usize),

    /// Recognized endpoint, unrecognized command name.
    #[error("bad command: {0}")]
    BadCommand(String),

    /// `set-filter` argument is not an array of strings.
    #[error("invalid filter")]
    InvalidFilter,

    /// `post` channel is not a string.
    #[error("invalid channel")]
    InvalidChannel,
}

impl ProtocolError {
    /// The wire code reported for this error.
    ///
    /// Oversized bodies are reported as syntax errors, matching the
    /// subscriber endpoint's observable behavior.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::SyntaxError | ProtocolError::BodyTooLarge(_) => codes::SYNTAX_ERROR,
            ProtocolError::BadCommand(_) => codes::BAD_COMMAND,
            ProtocolError::InvalidFilter => codes::INVALID_FILTER,
            ProtocolError::InvalidChannel => codes::INVALID_CHANNEL,
        }
    }

    /// Build the response envelope for this error.
    #[must_use]
    pub fn to_response(&self) -> Response {
        match self {
            ProtocolError::InvalidChannel => Response::error_code(codes::INVALID_CHANNEL),
            ProtocolError::InvalidFilter => Response::error(codes::INVALID_FILTER, "invalid filter"),
            ProtocolError::BadCommand(name) => {
                Response::error(codes::BAD_COMMAND, format!("bad command: {name}"))
            }
            ProtocolError::SyntaxError | ProtocolError::BodyTooLarge(_) => {
                Response::error(codes::SYNTAX_ERROR, "syntax error")
            }
        }
    }
}

fn parse_envelope(raw: &str) -> Result<(String, Value), ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::SyntaxError)?;
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::SyntaxError)?
        .replace('-', "_");
    Ok((command, value))
}

/// Decode a frame for the subscriber push endpoint.
///
/// `max_body` caps the frame size before any parsing happens. Unknown
/// commands are a syntax error on this endpoint.
///
/// # Errors
///
/// Returns a [`ProtocolError`] describing the rejection; the caller reports
/// it on the same connection and keeps the connection open.
pub fn decode_subscriber(raw: &str, max_body: usize) -> Result<SubscriberCommand, ProtocolError> {
    if raw.len() > max_body {
        return Err(ProtocolError::BodyTooLarge(raw.len()));
    }

    let (command, value) = parse_envelope(raw)?;
    match command.as_str() {
        "start_msg" => {
            let start = value
                .get("start")
                .and_then(Value::as_u64)
                .ok_or(ProtocolError::SyntaxError)?;
            Ok(SubscriberCommand::StartMsg { start })
        }
        "set_filter" => {
            let filter = value.get("filter").ok_or(ProtocolError::InvalidFilter)?;
            let filter: Vec<String> =
                serde_json::from_value(filter.clone()).map_err(|_| ProtocolError::InvalidFilter)?;
            Ok(SubscriberCommand::SetFilter { filter })
        }
        _ => Err(ProtocolError::SyntaxError),
    }
}

/// Decode a frame for the publisher endpoint.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidChannel`] when `post` carries a
/// non-string channel, [`ProtocolError::BadCommand`] for unknown command
/// names, and [`ProtocolError::SyntaxError`] for unparseable bodies.
pub fn decode_publisher(raw: &str) -> Result<PublisherCommand, ProtocolError> {
    let (command, value) = parse_envelope(raw)?;
    match command.as_str() {
        "post" => {
            let channel = value
                .get("channel")
                .and_then(Value::as_str)
                .ok_or(ProtocolError::InvalidChannel)?
                .to_string();
            // The original forwards whatever it got; a missing or
            // non-string payload degrades to the empty string here.
            let payload = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(PublisherCommand::Post { channel, payload })
        }
        "last_msg" => Ok(PublisherCommand::LastMsg),
        other => Err(ProtocolError::BadCommand(other.to_string())),
    }
}

/// Encode any serializable body to its JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails, which for the types in this
/// crate it cannot.
pub fn encode<T: serde::Serialize>(body: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(body)
}
