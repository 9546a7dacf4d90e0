//! Subscriber push endpoint.
//!
//! Each connection starts unfiltered: it may record a catch-up baseline with
//! `start-msg`, and comes alive with `set-filter`, which replays buffered
//! messages newer than the baseline and then streams matching publishes.
//! Command rejections are reported on the connection and never close it;
//! only transport close (or a send failure) tears the session down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_core::FollowerRegistration;
use beacon_protocol::{codec, MessageId, Response, SubscriberCommand};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;

/// Build the subscriber-socket router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

/// Per-connection session state, kept here rather than on the socket.
struct Session {
    /// Catch-up baseline recorded before the first filter registration.
    start: MessageId,
    /// Live registration, once a filter has been accepted.
    registration: Option<FollowerRegistration>,
}

impl Session {
    fn new() -> Self {
        Self {
            start: 0,
            registration: None,
        }
    }
}

async fn handle_subscriber(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new("subscriber");
    debug!("Subscriber connected");

    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new();

    loop {
        // The queue handle is cloned per iteration so the delivery future
        // owns it and the command arm can replace the registration.
        let queue = session.registration.as_ref().map(|r| Arc::clone(&r.queue));
        let delivery = async {
            match queue {
                Some(queue) => queue.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            delivered = delivery => {
                match delivered {
                    Some(message) => {
                        let body = match codec::encode(&*message) {
                            Ok(body) => body,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode delivery");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(body)).await.is_err() {
                            break;
                        }
                        metrics::record_delivery();
                    }
                    // Queue closed out from under us; the registration is gone.
                    None => break,
                }
            }

            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!("Subscriber sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Subscriber socket error");
                        break;
                    }
                    None => break,
                };

                if let Some(response) = apply_command(&state, &mut session, &text) {
                    let Ok(body) = codec::encode(&response) else { continue };
                    if sender.send(Message::Text(body)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(registration) = session.registration.take() {
        state.broker.deregister(registration.id);
        metrics::set_followers(state.broker.stats().followers);
    }

    debug!("Subscriber disconnected");
}

/// Apply one command frame to the session, returning the response to send
/// back, if any. Successful commands are silent.
fn apply_command(state: &AppState, session: &mut Session, raw: &str) -> Option<Response> {
    let max_body = state.config.limits.max_body_size;
    match codec::decode_subscriber(raw, max_body) {
        Ok(SubscriberCommand::StartMsg { start }) => {
            match &session.registration {
                // A late start-msg moves the live baseline, affecting the
                // next catch-up, exactly as before registration.
                Some(registration) => {
                    let _ = state.broker.set_start(registration.id, start);
                }
                None => session.start = start,
            }
            None
        }
        Ok(SubscriberCommand::SetFilter { filter }) => {
            let result = match &session.registration {
                Some(registration) => state.broker.replace_filter(registration.id, filter),
                None => match state.broker.register(session.start, filter) {
                    Ok(registration) => {
                        debug!(start = session.start, "Subscriber filter registered");
                        session.registration = Some(registration);
                        metrics::set_followers(state.broker.stats().followers);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "Filter rejected");
                    metrics::record_error("invalid-filter");
                    Some(Response::error("invalid-filter", "invalid filter"))
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Subscriber command rejected");
            metrics::record_error(e.code());
            Some(e.to_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use beacon_protocol::Message as WireMessage;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    #[tokio::test]
    async fn test_catch_up_then_live_delivery() {
        let state = state();
        let mut session = Session::new();
        let base = state.broker.last_id();

        state.broker.publish("a", "buffered");
        assert!(apply_command(&state, &mut session, r#"{"command":"set-filter","filter":["a"]}"#).is_none());

        state.broker.publish("a", "live");

        let queue = &session.registration.as_ref().unwrap().queue;
        let first = queue.recv().await.unwrap();
        let second = queue.recv().await.unwrap();
        assert_eq!((first.id, first.payload.as_str()), (base + 1, "buffered"));
        assert_eq!((second.id, second.payload.as_str()), (base + 2, "live"));
    }

    #[tokio::test]
    async fn test_start_msg_skips_already_seen() {
        let state = state();
        let mut session = Session::new();

        state.broker.publish("a", "old");
        let seen = state.broker.last_id();
        state.broker.publish("a", "new");

        let start = format!(r#"{{"command":"start-msg","start":{seen}}}"#);
        assert!(apply_command(&state, &mut session, &start).is_none());
        assert!(
            apply_command(&state, &mut session, r#"{"command":"set-filter","filter":["a"]}"#)
                .is_none()
        );

        let queue = &session.registration.as_ref().unwrap().queue;
        let only = queue.recv().await.unwrap();
        assert_eq!(only.payload, "new");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_oversized_filter_rejected_without_registration() {
        let state = state();
        let mut session = Session::new();

        let six: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
        let raw = format!(
            r#"{{"command":"set-filter","filter":{}}}"#,
            serde_json::to_string(&six).unwrap()
        );
        let response = apply_command(&state, &mut session, &raw);

        match response {
            Some(Response::Error { code, .. }) => assert_eq!(code, "invalid-filter"),
            other => panic!("expected invalid-filter, got {other:?}"),
        }
        assert!(session.registration.is_none());
        assert_eq!(state.broker.stats().followers, 0);
    }

    #[tokio::test]
    async fn test_bad_filter_keeps_previous_registration() {
        let state = state();
        let mut session = Session::new();

        assert!(
            apply_command(&state, &mut session, r#"{"command":"set-filter","filter":["a"]}"#)
                .is_none()
        );
        let response = apply_command(&state, &mut session, r#"{"command":"set-filter","filter":[]}"#);
        assert!(matches!(response, Some(Response::Error { .. })));

        state.broker.publish("a", "still flowing");
        let queue = &session.registration.as_ref().unwrap().queue;
        assert_eq!(queue.recv().await.unwrap().payload, "still flowing");
    }

    #[tokio::test]
    async fn test_refilter_reruns_catch_up_without_duplicates() {
        let state = state();
        let mut session = Session::new();

        state.broker.publish("a", "first");
        assert!(
            apply_command(&state, &mut session, r#"{"command":"set-filter","filter":["a"]}"#)
                .is_none()
        );
        assert!(
            apply_command(
                &state,
                &mut session,
                r#"{"command":"set-filter","filter":["a","b"]}"#
            )
            .is_none()
        );
        state.broker.publish("b", "second");

        let queue = &session.registration.as_ref().unwrap().queue;
        assert_eq!(queue.recv().await.unwrap().payload, "first");
        assert_eq!(queue.recv().await.unwrap().payload, "second");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_malformed_start_reports_and_preserves_baseline() {
        let state = state();
        let mut session = Session::new();

        let response = apply_command(&state, &mut session, r#"{"command":"start-msg","start":"x"}"#);
        match response {
            Some(Response::Error { code, .. }) => assert_eq!(code, "syntax-error"),
            other => panic!("expected syntax-error, got {other:?}"),
        }
        assert_eq!(session.start, 0);
        assert!(session.registration.is_none());
    }

    #[test]
    fn test_oversized_body_is_syntax_error() {
        let state = state();
        let mut session = Session::new();

        let raw = format!(
            r#"{{"command":"start-msg","start":1,"pad":"{}"}}"#,
            "x".repeat(250)
        );
        let response = apply_command(&state, &mut session, &raw);
        match response {
            Some(Response::Error { code, .. }) => assert_eq!(code, "syntax-error"),
            other => panic!("expected syntax-error, got {other:?}"),
        }
    }

    #[test]
    fn test_delivery_body_shape() {
        let message = WireMessage::new(3, "chan", "hello");
        let body = codec::encode(&message).unwrap();
        assert_eq!(body, r#"{"id":3,"channel":"chan","message":"hello"}"#);
    }
}
