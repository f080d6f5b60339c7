//! Notification sinks

use super::Notification;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// External paging / notification channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// POSTs each notification as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).with_context(|| format!("Invalid webhook URL: {}", url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create webhook HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("Failed to reach notification webhook")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}

/// Writes notifications to the log; used when no webhook is configured
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<()> {
        if n.page {
            warn!(
                event = "notification",
                subject = %n.subject,
                kind = ?n.kind,
                severity = %n.severity,
                page = true,
                "{}", n.message
            );
        } else {
            info!(
                event = "notification",
                subject = %n.subject,
                kind = ?n.kind,
                severity = %n.severity,
                page = false,
                "{}", n.message
            );
        }
        Ok(())
    }
}

/// Forwards notifications to an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        self.tx
            .send(notification.clone())
            .map_err(|_| anyhow::anyhow!("Notification receiver dropped"))
    }
}
