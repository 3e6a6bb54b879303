use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use greenlight_core::config::NotifierConfig;
use greenlight_core::domain::timeline::TimelineEntry;
use greenlight_core::workflow::{Notifier, StoreError};

/// Posts each committed timeline entry to a configured webhook. Delivery is
/// best effort by contract: the engine logs a failed notify and moves on, so
/// this type only has to report the failure, never retry it.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(url: String, token: Option<SecretString>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self { client, url, token }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, entry: &TimelineEntry) -> Result<(), StoreError> {
        let payload = json!({
            "entry_id": entry.entry_id,
            "approval_id": entry.approval_id.0,
            "quotation_id": entry.quotation_id.0,
            "event": entry.event.as_str(),
            "actor": entry.actor.0,
            "detail": entry.detail,
            "occurred_at": entry.occurred_at.to_rfc3339(),
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response =
            request.send().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        response.error_for_status().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Fallback when no webhook is configured: the notification channel is the
/// structured log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, entry: &TimelineEntry) -> Result<(), StoreError> {
        tracing::info!(
            event_name = "workflow.notify",
            approval_id = %entry.approval_id,
            quotation_id = %entry.quotation_id,
            timeline_event = entry.event.as_str(),
            actor = %entry.actor,
            "approval timeline notification"
        );
        Ok(())
    }
}

pub fn from_config(config: &NotifierConfig) -> std::sync::Arc<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => std::sync::Arc::new(WebhookNotifier::new(
            url.clone(),
            config.webhook_token.clone(),
            config.timeout_secs,
        )),
        None => std::sync::Arc::new(LogNotifier),
    }
}
