//! HTTP long-poll transport.
//!
//! One GET per outstanding poll against `/channels/<c1>|<c2>…?last=N`.
//! A 504 is the server saying "nothing yet", not a failure.

use async_trait::async_trait;
use beacon_protocol::{Message, MessageId};
use reqwest::StatusCode;
use tracing::trace;

use crate::traits::{ClientError, PollBackend, PollReply};

/// Long-poll client over reqwest.
pub struct HttpPoller {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPoller {
    /// Create a poller against a base URL such as `http://127.0.0.1:15102`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn poll_url(&self, channels: &str) -> String {
        format!("{}/channels/{}", self.base_url, channels)
    }
}

#[async_trait]
impl PollBackend for HttpPoller {
    async fn poll(&self, channels: &str, last: MessageId) -> Result<PollReply, ClientError> {
        let response = self
            .client
            .get(self.poll_url(channels))
            .query(&[("last", last.to_string())])
            .send()
            .await
            .map_err(|e| ClientError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let message: Message = response
                    .json()
                    .await
                    .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
                trace!(id = message.id, channel = %message.channel, "Poll delivered");
                Ok(PollReply::Message(message))
            }
            StatusCode::GATEWAY_TIMEOUT => Ok(PollReply::TimedOut),
            status => Err(ClientError::RequestFailed(format!(
                "unexpected status {status}"
            ))),
        }
    }
}
