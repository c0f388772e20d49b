use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{error, info, instrument};

use super::{Notifier, NotifyError};
use crate::config::Twilio;

/// Sends alerts as SMS through the Twilio Messages API.
///
/// Twilio acknowledges a queued message with `201 Created`; anything else is
/// treated as a failure.
#[derive(Debug, Clone)]
pub struct TwilioNotifier {
    client: Client,
    config: Twilio,
}

impl TwilioNotifier {
    pub fn new(client: Client, config: Twilio) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    #[instrument(skip(self, message))]
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let to = format!("{}{destination}", self.config.country_prefix);
        let params = [
            ("To", to.as_str()),
            ("From", self.config.from_number.as_str()),
            ("Body", message),
        ];

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            error!("twilio rejected alert SMS with status {status}");
            return Err(NotifyError::Rejected { status, body });
        }

        info!("alert SMS sent to {to}");
        Ok(())
    }
}
