//! Alert types and core trait definitions.

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Header line and mail subject of every alert.
pub const ALERT_TITLE: &str = "CESS Watchdog Alert";

/// Display format for alert timestamps.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Something worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Local>,
    /// Host the event was observed on.
    pub host: String,
    pub description: String,
    /// Signature account of the affected miner.
    pub account: Option<String>,
    pub container_id: Option<String>,
    pub block_number: Option<u64>,
    /// Explorer link with more detail.
    pub detail_url: Option<String>,
}

impl AlertEvent {
    /// Create an event stamped with the current time.
    pub fn new(host: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            host: host.into(),
            description: description.into(),
            account: None,
            container_id: None,
            block_number: None,
            detail_url: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    pub fn with_detail_url(mut self, url: impl Into<String>) -> Self {
        self.detail_url = Some(url.into());
        self
    }

    /// Check that host and description are present.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.host.trim().is_empty() {
            return Err(MonitorError::IncompleteAlert("host"));
        }
        if self.description.trim().is_empty() {
            return Err(MonitorError::IncompleteAlert("description"));
        }
        Ok(())
    }

    /// Compose the message sent to every channel.
    ///
    /// Optional lines are left out when empty; a block number of zero counts
    /// as empty.
    pub fn to_message(&self) -> Result<AlertMessage, MonitorError> {
        self.validate()?;

        let mut body = String::from(ALERT_TITLE);
        push_line(&mut body, "Alert Time", &self.timestamp.format(TIME_FORMAT).to_string());
        push_line(&mut body, "IP", &self.host);
        push_line(&mut body, "Message", &self.description);
        push_line(&mut body, "Url", self.detail_url.as_deref().unwrap_or_default());
        push_line(&mut body, "Signature Account", self.account.as_deref().unwrap_or_default());
        push_line(&mut body, "Container ID", self.container_id.as_deref().unwrap_or_default());
        if let Some(block) = self.block_number.filter(|b| *b != 0) {
            push_line(&mut body, "Block Number", &block.to_string());
        }

        Ok(AlertMessage {
            subject: ALERT_TITLE.to_string(),
            body,
        })
    }
}

fn push_line(body: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        body.push('\n');
        body.push_str(label);
        body.push_str(": ");
        body.push_str(value);
    }
}

/// A composed alert, built once and shared by all channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Alert channel trait.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Deliver a message.
    async fn send(&self, message: &AlertMessage) -> Result<(), MonitorError>;
}
