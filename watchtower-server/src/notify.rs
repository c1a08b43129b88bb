//! Webhook alert delivery.

use async_trait::async_trait;
use watchtower_core::{AlertSink, TransitionAlert};

/// Posts each alert as JSON to a configured webhook.
///
/// Delivery is best effort; a failed post is logged and the watch outcome is
/// unaffected.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self { client: reqwest::Client::new(), url }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &TransitionAlert) {
        let payload = serde_json::json!({
            "text": alert.headline(),
            "alert": alert,
        });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(handle = %alert.handle, kind = %alert.kind, "alert delivered to webhook");
            }
            Ok(resp) => {
                tracing::warn!(
                    handle = %alert.handle,
                    status = %resp.status(),
                    "webhook rejected alert"
                );
            }
            Err(err) => {
                tracing::warn!(handle = %alert.handle, error = %err, "webhook delivery failed");
            }
        }
    }
}
