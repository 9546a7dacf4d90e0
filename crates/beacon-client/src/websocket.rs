//! WebSocket push transport.
//!
//! Connects to the broker's subscriber socket with tokio-tungstenite. The
//! connect timeout doubles as the transport-selection probe: if the socket
//! is not up within it, the dispatcher falls back to long-polling.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::traits::{ClientError, PushStream};

/// A client WebSocket connection carrying JSON text frames.
pub struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsStream {
    /// Connect to a `ws://` URL, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] on handshake failure or
    /// timeout.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok((inner, _response))) => {
                debug!(url, "WebSocket connected");
                Ok(Self { inner })
            }
            Ok(Err(e)) => Err(ClientError::ConnectFailed(e.to_string())),
            Err(_) => Err(ClientError::ConnectFailed(format!(
                "no connection within {timeout:?}"
            ))),
        }
    }
}

#[async_trait]
impl PushStream for WsStream {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::SendFailed(e.to_string()))
    }

    async fn next(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.inner.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(ClientError::RequestFailed(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}
