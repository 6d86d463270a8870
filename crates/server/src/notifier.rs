use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use expensa_core::config::NotificationConfig;
use expensa_core::notify::{Notification, NotificationError, NotificationSender};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

/// Writes notifications to the log instead of delivering them.
#[derive(Clone, Debug, Default)]
pub struct TracingNotificationSender;

#[async_trait]
impl NotificationSender for TracingNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let recipients = notification
            .recipients()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        info!(
            event_name = "notification.logged",
            notification = notification.event_name(),
            recipients = %recipients,
            "notification recorded without delivery"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    event: &'static str,
    recipients: Vec<String>,
    notification: &'a Notification,
}

/// Posts notifications as JSON to a mail relay webhook.
pub struct WebhookNotificationSender {
    client: Client,
    webhook_url: String,
    api_token: SecretString,
    from_address: String,
}

impl WebhookNotificationSender {
    pub fn new(webhook_url: String, api_token: SecretString, from_address: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, webhook_url, api_token, from_address }
    }

    fn payload<'a>(&'a self, notification: &'a Notification) -> WebhookPayload<'a> {
        WebhookPayload {
            from: &self.from_address,
            event: notification.event_name(),
            recipients: notification.recipients().iter().map(ToString::to_string).collect(),
            notification,
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .bearer_auth(self.api_token.expose_secret())
            .json(&self.payload(notification))
            .send()
            .await
            .map_err(|error| NotificationError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected { status: response.status().as_u16() });
        }

        info!(
            event_name = "notification.delivered",
            notification = notification.event_name(),
            "notification delivered to webhook"
        );
        Ok(())
    }
}

/// Webhook delivery when notifications are enabled and fully configured, logging otherwise.
pub fn from_config(config: &NotificationConfig) -> Arc<dyn NotificationSender> {
    match (config.enabled, &config.webhook_url, &config.api_token) {
        (true, Some(webhook_url), Some(api_token)) => Arc::new(WebhookNotificationSender::new(
            webhook_url.clone(),
            api_token.clone(),
            config.from_address.clone(),
        )),
        _ => Arc::new(TracingNotificationSender),
    }
}
