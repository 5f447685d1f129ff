// ABOUTME: Deployment outcome notifications.
// ABOUTME: Webhook notifier posting a JSON text message, compatible with Telegram sendMessage.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{NotifyConfig, resolve_env_map};
use crate::deploy::{DeployStatus, DeploymentRecord};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    /// Needs a human: the service may be in an unknown state.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub status: DeployStatus,
    pub priority: Priority,
    pub text: String,
}

impl Notification {
    /// Summarize a finished deployment.
    pub fn for_record(record: &DeploymentRecord, fatal: bool) -> Self {
        let version = record
            .version_tag
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let slot = record
            .slot
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut text = if fatal {
            format!(
                "ROLLBACK FAILED: {} {} needs manual intervention (version {}, slot {})",
                record.service, record.environment, version, slot
            )
        } else {
            format!(
                "{} {}: {} (version {}, slot {})",
                record.service, record.environment, record.status, version, slot
            )
        };
        if let Some(ref error) = record.error {
            text.push_str(&format!("\n{}", error));
        }

        Self {
            status: record.status,
            priority: if fatal {
                Priority::Critical
            } else {
                Priority::Normal
            },
            text,
        }
    }
}

/// Delivers notifications. Delivery failures never change a deployment outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(status = %notification.status, "no notification channel configured");
        Ok(())
    }
}

/// POSTs `{"text": ..., <extra>}` to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    extra: HashMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        extra: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("switchyard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            extra,
        })
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let url = config
            .url
            .resolve()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        let extra = resolve_env_map(&config.extra).map_err(|e| NotifyError::Config(e.to_string()))?;
        Self::new(url, extra, config.timeout)
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        for (k, v) in &self.extra {
            body.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        body.insert(
            "text".to_string(),
            serde_json::Value::String(notification.text.clone()),
        );
        serde_json::Value::Object(body)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&self.payload(notification))
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(status = %notification.status, "notification sent");
        Ok(())
    }
}
