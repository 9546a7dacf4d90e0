//! Publisher endpoint.
//!
//! Trusted internal callers connect here to post messages and query the
//! latest assigned id. Every command gets exactly one response envelope on
//! the same connection; no rejection is fatal to the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_protocol::{codec, PublisherCommand, Response};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;

/// Build the publisher-socket router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_publisher(socket, state))
}

async fn handle_publisher(mut socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new("publisher");
    debug!("Publisher connected");

    while let Some(incoming) = socket.recv().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Ping(data)) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(error = %e, "Publisher socket error");
                break;
            }
        };

        let response = dispatch(&state, &text);
        let body = match codec::encode(&response) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to encode publisher response");
                continue;
            }
        };
        if socket.send(Message::Text(body)).await.is_err() {
            break;
        }
    }

    debug!("Publisher disconnected");
}

fn dispatch(state: &AppState, raw: &str) -> Response {
    match codec::decode_publisher(raw) {
        Ok(PublisherCommand::Post { channel, payload }) => {
            let id = state.broker.publish(&channel, &payload);
            metrics::record_publish();
            debug!(id, channel = %channel, "Posted");
            Response::success(id)
        }
        Ok(PublisherCommand::LastMsg) => Response::success(state.broker.last_id()),
        Err(e) => {
            warn!(error = %e, "Publisher command rejected");
            metrics::record_error(e.code());
            e.to_response()
        }
    }
}
