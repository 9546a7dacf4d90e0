//! Long-poll HTTP endpoint.
//!
//! `GET /channels/<c1>|<c2>…?last=N` answers with the oldest buffered
//! message newer than `last` on one of the named channels, or parks the
//! request until a matching publish or the configured timeout. A dropped
//! request (client disconnect) cancels its pending poll via a drop guard,
//! so no sweep is needed.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use beacon_core::{Broker, PollOutcome, PollTicket, PollerId};
use beacon_protocol::Message;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::metrics;
use crate::state::AppState;

/// Build the long-poll HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/channels", get(empty_channels))
        .route("/channels/", get(empty_channels))
        .route("/channels/*channels", get(poll_handler))
        .route("/health", get(health_handler))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    last: Option<String>,
}

async fn poll_handler(
    Path(channels): Path<String>,
    Query(query): Query<PollQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let channels = parse_channels(&channels);
    if channels.is_empty() {
        return bad_request();
    }
    let last = parse_last(query.last.as_deref());

    match state.broker.poll(channels, last) {
        PollOutcome::Ready(message) => {
            trace!(id = message.id, "Poll answered immediately");
            (StatusCode::OK, Json((*message).clone())).into_response()
        }
        PollOutcome::Pending(ticket) => {
            metrics::set_pending_polls(state.broker.stats().pending_polls);
            let held = wait_for_match(&state.broker, ticket, state.config.long_poll.timeout()).await;
            metrics::set_pending_polls(state.broker.stats().pending_polls);
            match held {
                Some(message) => {
                    debug!(id = message.id, "Poll resolved by publish");
                    (StatusCode::OK, Json((*message).clone())).into_response()
                }
                None => {
                    metrics::record_poll_timeout();
                    (
                        StatusCode::GATEWAY_TIMEOUT,
                        Json(serde_json::json!({"error": "timeout"})),
                    )
                        .into_response()
                }
            }
        }
    }
}

/// Park on the ticket until a matching publish or the timeout.
///
/// The guard removes the pending poll whichever way this future ends,
/// including being dropped because the client went away.
async fn wait_for_match(
    broker: &Broker,
    ticket: PollTicket,
    timeout: Duration,
) -> Option<Arc<Message>> {
    let PollTicket { id, receiver } = ticket;
    let _guard = PollGuard { broker, id };
    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(message)) => Some(message),
        // Elapsed, or the responder vanished; either way the poll is over.
        _ => None,
    }
}

struct PollGuard<'a> {
    broker: &'a Broker,
    id: PollerId,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.broker.cancel_poll(self.id);
    }
}

/// Split the pipe-delimited path segment into a channel set.
fn parse_channels(raw: &str) -> HashSet<String> {
    if raw.is_empty() {
        return HashSet::new();
    }
    raw.split('|').map(str::to_string).collect()
}

/// `last` defaults to 0 and clamps to 0 when not a base-10 integer.
fn parse_last(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

async fn empty_channels() -> Response {
    bad_request()
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "400 Bad Request").into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::BrokerConfig;
    use std::time::Instant;

    fn broker() -> Broker {
        Broker::with_start_id(BrokerConfig::default(), 0)
    }

    fn channels(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_channels() {
        assert_eq!(parse_channels("a"), channels(&["a"]));
        assert_eq!(parse_channels("a|b|c"), channels(&["a", "b", "c"]));
        assert!(parse_channels("").is_empty());
        // Empty entries between delimiters are kept; they just never match.
        assert_eq!(parse_channels("a||b"), channels(&["a", "", "b"]));
    }

    #[test]
    fn test_parse_last() {
        assert_eq!(parse_last(None), 0);
        assert_eq!(parse_last(Some("17")), 17);
        assert_eq!(parse_last(Some("abc")), 0);
        assert_eq!(parse_last(Some("-4")), 0);
        assert_eq!(parse_last(Some("1.5")), 0);
    }

    #[tokio::test]
    async fn test_timeout_resolves_no_earlier_than_deadline() {
        let broker = broker();
        let ticket = match broker.poll(channels(&["x"]), 0) {
            PollOutcome::Pending(ticket) => ticket,
            PollOutcome::Ready(_) => panic!("log is empty"),
        };

        let deadline = Duration::from_millis(100);
        let started = Instant::now();
        let outcome = wait_for_match(&broker, ticket, deadline).await;

        assert!(outcome.is_none());
        assert!(started.elapsed() >= deadline);
        assert_eq!(broker.stats().pending_polls, 0);
    }

    #[tokio::test]
    async fn test_publish_resolves_parked_poll() {
        let broker = Arc::new(broker());
        let ticket = match broker.poll(channels(&["x"]), 0) {
            PollOutcome::Pending(ticket) => ticket,
            PollOutcome::Ready(_) => panic!("log is empty"),
        };

        let publisher = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                broker.publish("x", "hit");
            })
        };

        let message = wait_for_match(&broker, ticket, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(message.channel, "x");
        assert_eq!(message.payload, "hit");
        publisher.await.unwrap();
        assert_eq!(broker.stats().pending_polls, 0);
    }

    #[tokio::test]
    async fn test_dropped_wait_cancels_pending_poll() {
        let broker = broker();
        let ticket = match broker.poll(channels(&["x"]), 0) {
            PollOutcome::Pending(ticket) => ticket,
            PollOutcome::Ready(_) => panic!("log is empty"),
        };
        assert_eq!(broker.stats().pending_polls, 1);

        // Simulates the client hanging up: the in-flight wait is dropped.
        let hung_up = tokio::time::timeout(
            Duration::from_millis(20),
            wait_for_match(&broker, ticket, Duration::from_secs(60)),
        )
        .await;
        assert!(hung_up.is_err());
        assert_eq!(broker.stats().pending_polls, 0);
    }
}
