//! Failure notifier implementations.

use crate::channels::{NotifierConfig, WebhookConfig};
use async_trait::async_trait;
use canto_core::ports::FailureNotifier;
use canto_core::{Address, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Receiver dropped")]
    ReceiverDropped,
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// A permanently failed fetch, as reported to notification channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhaustedNotice {
    pub address: Address,
    pub error: String,
    pub transient: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ExhaustedNotice {
    pub fn new(address: &Address, error: &Error) -> Self {
        Self {
            address: address.clone(),
            error: error.to_string(),
            transient: error.is_transient(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Logs each failure as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error) {
        warn!(%address, error = %error, "Fetch failed permanently; entry needs a retry");
    }
}

/// Forwards failures to a channel, typically drained by the UI to show a
/// toast with a retry action.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ExhaustedNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExhaustedNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, notice: ExhaustedNotice) -> Result<(), NotifyError> {
        self.tx.send(notice).map_err(|_| NotifyError::ReceiverDropped)
    }
}

#[async_trait]
impl FailureNotifier for ChannelNotifier {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error) {
        if let Err(e) = self.send(ExhaustedNotice::new(address, error)) {
            debug!(%address, error = %e, "Failure notice not delivered");
        }
    }
}

/// Posts failures as JSON to a webhook.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        let timeout = config.timeout_seconds;
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout as u64))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn send(&self, notice: &ExhaustedNotice) -> Result<(), NotifyError> {
        debug!(url = %self.config.url, address = %notice.address, "Sending webhook notification");

        let mut request = self.client.post(&self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.json(notice).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::DeliveryFailed(format!(
                "Webhook returned {}: {}",
                status, body
            )));
        }

        info!(address = %notice.address, "Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error) {
        if let Err(e) = self.send(&ExhaustedNotice::new(address, error)).await {
            warn!(url = %self.config.url, %address, error = %e, "Webhook notification failed");
        }
    }
}

/// Reports each failure to every inner notifier, in order.
#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn FailureNotifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn FailureNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn with(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl FailureNotifier for FanoutNotifier {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error) {
        for notifier in &self.notifiers {
            notifier.on_fetch_exhausted(address, error).await;
        }
    }
}

/// Build a notifier from configuration. An empty list logs.
pub fn create_notifier(configs: &[NotifierConfig]) -> Arc<dyn FailureNotifier> {
    let mut notifiers: Vec<Arc<dyn FailureNotifier>> = configs
        .iter()
        .map(|config| -> Arc<dyn FailureNotifier> {
            match config {
                NotifierConfig::Log => Arc::new(LogNotifier),
                NotifierConfig::Webhook(c) => Arc::new(WebhookNotifier::new(c.clone())),
            }
        })
        .collect();

    match notifiers.len() {
        0 => Arc::new(LogNotifier),
        1 => notifiers.remove(0),
        _ => Arc::new(FanoutNotifier::new(notifiers)),
    }
}
