//! Alert delivery
//!
//! A [`Notifier`] takes a destination and a ready-made message and reports
//! whether the remote side accepted it. Evaluation happens elsewhere; a
//! notifier only moves text.
//!
//! Shipped transports:
//!
//! - [`TwilioNotifier`]: SMS through the Twilio REST API
//! - [`WebhookNotifier`]: JSON POST to an arbitrary URL
//! - [`DiscordNotifier`]: Discord webhook with an embed

pub mod discord;
pub mod twilio;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub use discord::DiscordNotifier;
pub use twilio::TwilioNotifier;
pub use webhook::WebhookNotifier;

use crate::config::NotifierConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to reach notification service: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification service answered with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("notification not delivered within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `destination`. One attempt, no retry.
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Build the configured notifier with a client bounded by `timeout`.
pub fn from_config(
    config: &NotifierConfig,
    timeout: Duration,
) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let notifier: Arc<dyn Notifier> = match config {
        NotifierConfig::Twilio(twilio) => Arc::new(TwilioNotifier::new(client, twilio.clone())),
        NotifierConfig::Webhook(webhook) => Arc::new(WebhookNotifier::new(client, webhook.clone())),
        NotifierConfig::Discord(discord) => Arc::new(DiscordNotifier::new(client, discord.clone())),
    };

    Ok(notifier)
}
