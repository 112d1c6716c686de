//! Webhook notifier

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::errors::DeckhandError;
use crate::notify::{BuildNotification, Notifier};

/// Notifier posting JSON to a webhook URL
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a new webhook notifier
    pub fn new(url: &str) -> Result<Self, DeckhandError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_build_result(&self, notification: &BuildNotification) -> Result<(), DeckhandError> {
        debug!("POST {}", self.url);

        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeckhandError::NotifyError(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }
}
