use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use super::{Notifier, NotifyError};
use crate::config::Webhook;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
}

impl WebhookNotifier {
    pub fn new(client: Client, webhook: Webhook) -> Self {
        Self { client, webhook }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, message))]
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let payload = json!({
            "message": message,
            "destination": destination,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.webhook.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!("webhook alert failed with status: {status}");
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        info!("successfully sent webhook alert");
        Ok(())
    }
}
