//! Alert dispatcher fanning events out to channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use minerguard_config::AlertConfig;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::MonitorError;

use super::alert_channels::{EmailChannel, WebhookChannel};
use super::alerts::{AlertChannel, AlertEvent};

/// Alert dispatcher.
///
/// Every event is logged. Delivery happens only while alerting is enabled.
pub struct AlertDispatcher {
    enabled: AtomicBool,
    channels: Vec<Arc<dyn AlertChannel>>,
    tracker: TaskTracker,
}

impl AlertDispatcher {
    /// Create a dispatcher without channels.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            channels: Vec::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Create from config.
    ///
    /// Webhook providers are resolved here once. URLs that match no known
    /// provider are skipped with a warning.
    pub fn from_config(config: &AlertConfig) -> Self {
        let mut dispatcher = Self::new(config.enable);

        for url in &config.webhook {
            match WebhookChannel::from_url(url) {
                Some(channel) => {
                    info!("Adding {} alert channel", channel.kind());
                    dispatcher.add_channel(Arc::new(channel));
                }
                None => warn!(
                    "Unknown webhook type for {}, no alerts will be sent to it",
                    minerguard_config::redact_webhook_url(url)
                ),
            }
        }

        if config.email.is_configured() {
            match EmailChannel::new(&config.email) {
                Ok(channel) => {
                    info!("Adding Email alert channel");
                    dispatcher.add_channel(Arc::new(channel));
                }
                Err(e) => warn!("Email alert channel disabled: {}", e),
            }
        }

        dispatcher
    }

    /// Add a channel.
    pub fn add_channel(&mut self, channel: Arc<dyn AlertChannel>) {
        self.channels.push(channel);
    }

    /// Get list of channel names.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle alert delivery at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!("Alerting {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Send an event to all channels concurrently and wait for every one.
    ///
    /// Returns the failures; one channel failing never stops the others.
    pub async fn dispatch(&self, event: &AlertEvent) -> Vec<MonitorError> {
        warn!(
            host = %event.host,
            account = event.account.as_deref().unwrap_or_default(),
            block = event.block_number.unwrap_or_default(),
            "[ALERT] {}",
            event.description
        );

        if !self.is_enabled() {
            return Vec::new();
        }

        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!("Can not build alert message: {}", e);
                return vec![e];
            }
        };

        let results = join_all(self.channels.iter().map(|channel| {
            let message = &message;
            async move { (channel.name(), channel.send(message).await) }
        }))
        .await;

        let mut errors = Vec::new();
        for (name, result) in results {
            if let Err(e) = result {
                error!("Failed to send alert via {}: {}", name, e);
                errors.push(e);
            }
        }

        errors
    }

    /// Dispatch in the background. Use [`flush`](Self::flush) to wait.
    pub fn submit(self: &Arc<Self>, event: AlertEvent) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            this.dispatch(&event).await;
        });
    }

    /// Wait for every submitted dispatch to finish.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}
