//! HTTP webhook publisher.

use super::{PublishError, SpotMessage, SpotPublisher};
use crate::config::ReceiverIdentity;
use crate::decoder::Decode;

use std::time::Duration;

/// POSTs each spot as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
    reporter: ReceiverIdentity,
}

impl WebhookPublisher {
    pub fn new(url: &str, reporter: ReceiverIdentity) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            reporter,
        })
    }
}

impl SpotPublisher for WebhookPublisher {
    fn publish(&self, decode: &Decode, band: &str, dial_frequency_hz: u64) -> Result<(), PublishError> {
        let msg = SpotMessage::new(decode, band, dial_frequency_hz, &self.reporter);
        let body = serde_json::to_vec(&msg)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PublishError::NoRuntime)?;

        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("Publisher {}: published spot {}", msg.band, msg.callsign);
                }
                Ok(resp) => {
                    tracing::error!(
                        "Publisher {}: publish of {} rejected: HTTP {}",
                        msg.band,
                        msg.callsign,
                        resp.status()
                    );
                }
                Err(e) => {
                    tracing::error!("Publisher {}: publish of {} failed: {}", msg.band, msg.callsign, e);
                }
            }
        });

        Ok(())
    }
}
