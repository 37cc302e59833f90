//! Configuration schema definitions.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::redact::{mask_email, redact_webhook_url};

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;

/// Lower bound for the scrape interval in seconds.
pub const MIN_SCRAPE_INTERVAL_SECS: u64 = 1800;

/// Upper bound for the scrape interval in seconds.
pub const MAX_SCRAPE_INTERVAL_SECS: u64 = 3600;

/// Placeholder written over secrets in redacted output.
pub const REDACTED: &str = "******";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Port of the administration API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether the administration API listens on external interfaces.
    #[serde(default)]
    pub external: bool,

    /// Seconds between two monitoring cycles of a host.
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval: u64,

    /// Chain RPC endpoints, tried in order.
    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,

    /// Image name fragment identifying miner containers.
    #[serde(default = "default_miner_image")]
    pub miner_image: String,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub alert: AlertConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            external: false,
            scrape_interval: default_scrape_interval(),
            rpc_endpoints: default_rpc_endpoints(),
            miner_image: default_miner_image(),
            hosts: Vec::new(),
            alert: AlertConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    13080
}

fn default_scrape_interval() -> u64 {
    MIN_SCRAPE_INTERVAL_SECS
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "http://127.0.0.1:9944".to_string(),
        "https://testnet-rpc.cess.network".to_string(),
    ]
}

fn default_miner_image() -> String {
    "cesslab/cess-miner".to_string()
}

impl Config {
    /// Clamp the scrape interval and fill in authentication defaults.
    pub fn normalize(mut self) -> Self {
        self.scrape_interval = self
            .scrape_interval
            .clamp(MIN_SCRAPE_INTERVAL_SECS, MAX_SCRAPE_INTERVAL_SECS);
        self.auth = self.auth.with_defaults();
        self
    }

    /// Scrape interval as a duration.
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval)
    }

    /// Copy with secrets masked, suitable for display.
    pub fn redacted(&self) -> Config {
        let mut conf = self.clone();
        conf.alert.webhook = conf
            .alert
            .webhook
            .iter()
            .map(|url| redact_webhook_url(url))
            .collect();
        conf.alert.email.receiver = conf
            .alert
            .email
            .receiver
            .iter()
            .map(|addr| mask_email(addr))
            .collect();
        conf.alert.email.sender_addr = mask_email(&conf.alert.email.sender_addr);
        conf.alert.email.smtp_password = REDACTED.to_string();
        conf.auth.password = REDACTED.to_string();
        conf.auth.jwt_secret_key = REDACTED.to_string();
        conf
    }
}

/// A monitored host running a container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub ip: String,

    /// Port of the container engine API.
    #[serde(default = "default_engine_port")]
    pub port: u16,
}

fn default_engine_port() -> u16 {
    2375
}

impl HostConfig {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: default_engine_port(),
        }
    }

    /// Base URL of the host's container engine API.
    pub fn engine_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    /// Global alert switch.
    #[serde(default)]
    pub enable: bool,

    /// Block explorer used to build detail links.
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,

    /// Chat webhook URLs.
    #[serde(default)]
    pub webhook: Vec<String>,

    #[serde(default)]
    pub email: EmailConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enable: false,
            explorer_url: default_explorer_url(),
            webhook: Vec::new(),
            email: EmailConfig::default(),
        }
    }
}

fn default_explorer_url() -> String {
    "https://scan.cess.network".to_string()
}

/// SMTP settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_endpoint: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender_addr: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub receiver: Vec<String>,
}

impl EmailConfig {
    /// Mail delivery is enabled only when every field is present.
    pub fn is_configured(&self) -> bool {
        !self.smtp_endpoint.is_empty()
            && self.smtp_port != 0
            && !self.sender_addr.is_empty()
            && !self.smtp_password.is_empty()
            && !self.receiver.is_empty()
    }

    /// Some, but not all, fields are set.
    pub fn is_partial(&self) -> bool {
        let any = !self.smtp_endpoint.is_empty()
            || self.smtp_port != 0
            || !self.sender_addr.is_empty()
            || !self.smtp_password.is_empty()
            || !self.receiver.is_empty();
        any && !self.is_configured()
    }
}

/// Administration API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub jwt_secret_key: String,
    /// Token lifetime in hours.
    #[serde(default)]
    pub token_expiry: u32,
}

impl AuthConfig {
    fn with_defaults(mut self) -> Self {
        if self.username.is_empty() {
            self.username = "cess".to_string();
        }
        if self.password.is_empty() {
            self.password = "Cess123456".to_string();
        }
        if self.jwt_secret_key.is_empty() {
            self.jwt_secret_key = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            info!("Generated a random JWT secret key because none was configured");
        }
        if !(1..=24).contains(&self.token_expiry) {
            self.token_expiry = 1;
        }
        self
    }
}
