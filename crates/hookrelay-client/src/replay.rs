//! Replay of parsed webhooks against the local target service.
//!
//! One POST per event, no retries. A failing target must never stall the
//! relay: non-2xx responses and transport errors alike are logged and the
//! subscription loop moves on.

use std::time::Duration;

use hookrelay_core::payload::PayloadMessage;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};

/// Issues replay requests to the local target.
pub struct Replayer {
    client: reqwest::Client,
    target_url: String,
}

impl Replayer {
    /// Builds the replay HTTP client.
    ///
    /// The timeout bounds each replay attempt end to end; TLS
    /// verification is disabled only when the user asked for it.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        target_url: String,
        timeout: Duration,
        insecure_tls: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self { client, target_url })
    }

    /// Replays one webhook: POST the parsed body with the parsed headers.
    ///
    /// When the envelope carried no `Content-Type` header, the recorded
    /// content type fills in. Failures are logged, never propagated.
    pub async fn replay(&self, message: &PayloadMessage) {
        let mut headers = http::HeaderMap::new();
        for (name, value) in &message.headers {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.insert(name, value);
        }
        if !headers.contains_key(CONTENT_TYPE) && !message.content_type.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&message.content_type) {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let result = self
            .client
            .post(&self.target_url)
            .headers(headers)
            .body(message.body.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    tracing::info!(
                        timestamp = %message.timestamp,
                        event_type = %message.event_type,
                        event_id = %message.event_id,
                        status = status.as_u16(),
                        "replayed to {}",
                        self.target_url
                    );
                } else {
                    tracing::warn!(
                        timestamp = %message.timestamp,
                        event_type = %message.event_type,
                        status = status.as_u16(),
                        "target answered {} for replay to {}",
                        status,
                        self.target_url
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    event_type = %message.event_type,
                    error = %err,
                    "failed to replay to {}",
                    self.target_url
                );
            }
        }
    }
}
