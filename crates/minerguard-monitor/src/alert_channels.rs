//! Alert channel implementations (chat webhooks, Email).

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use minerguard_config::{EmailConfig, WebhookKind};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::MonitorError;

use super::alerts::{AlertChannel, AlertMessage};

/// SMTP port that expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Retry behaviour for webhook delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Request body understood by each provider.
pub fn webhook_payload(kind: WebhookKind, text: &str) -> Value {
    match kind {
        WebhookKind::Discord => json!({ "content": text }),
        WebhookKind::Slack | WebhookKind::Teams => json!({ "text": text }),
        WebhookKind::DingTalk | WebhookKind::WeChatWork => json!({
            "msgtype": "text",
            "text": { "content": text }
        }),
        WebhookKind::Lark => json!({
            "msg_type": "text",
            "content": { "text": text }
        }),
    }
}

/// Chat webhook channel.
pub struct WebhookChannel {
    kind: WebhookKind,
    url: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a channel for a URL whose provider is already known.
    pub fn new(kind: WebhookKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Classify `url` and create a channel, or `None` for unknown providers.
    pub fn from_url(url: &str) -> Option<Self> {
        WebhookKind::from_url(url).map(|kind| Self::new(kind, url))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn kind(&self) -> WebhookKind {
        self.kind
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), MonitorError> {
        let payload = webhook_payload(self.kind, &message.body);
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.client.post(&self.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("{} alert sent successfully", self.kind);
                    return Ok(());
                }
                Ok(response) => {
                    last_error = format!("{} webhook returned {}", self.kind, response.status());
                }
                Err(e) => {
                    last_error = format!("{} request failed: {}", self.kind, e);
                }
            }

            warn!("{}, retrying ({}/{})", last_error, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        Err(MonitorError::AlertDelivery(last_error))
    }
}

/// Email channel (SMTP).
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Create an Email channel. Addresses are parsed up front.
    pub fn new(config: &EmailConfig) -> Result<Self, MonitorError> {
        if !config.is_configured() {
            return Err(MonitorError::InvalidConfig(
                "email settings are incomplete".to_string(),
            ));
        }

        let from: Mailbox = config
            .sender_addr
            .parse()
            .map_err(|e| MonitorError::InvalidConfig(format!("sender address: {}", e)))?;
        let to = config
            .receiver
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| MonitorError::InvalidConfig(format!("receiver {}: {}", addr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if config.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_endpoint)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_endpoint)
        }
        .map_err(|e| MonitorError::InvalidConfig(format!("smtp endpoint: {}", e)))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender_addr.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        Ok(Self { transport, from, to })
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), MonitorError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for receiver in &self.to {
            builder = builder.to(receiver.clone());
        }
        let email = builder
            .body(message.body.clone())
            .map_err(|e| MonitorError::Email(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MonitorError::Email(e.to_string()))?;

        debug!("Email alert sent to {} receivers", self.to.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> AlertMessage {
        AlertMessage {
            subject: "CESS Watchdog Alert".to_string(),
            body: "CESS Watchdog Alert\nIP: 10.0.0.1\nMessage: down".to_string(),
        }
    }

    fn no_delay() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_payload_shapes() {
        assert_eq!(
            webhook_payload(WebhookKind::Discord, "hi"),
            json!({"content": "hi"})
        );
        assert_eq!(webhook_payload(WebhookKind::Teams, "hi"), json!({"text": "hi"}));
        assert_eq!(
            webhook_payload(WebhookKind::WeChatWork, "hi"),
            json!({"msgtype": "text", "text": {"content": "hi"}})
        );
        assert_eq!(
            webhook_payload(WebhookKind::Lark, "hi"),
            json!({"msg_type": "text", "content": {"text": "hi"}})
        );
    }

    #[tokio::test]
    async fn test_webhook_posts_provider_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks.slack.com/services"))
            .and(body_json(json!({"text": message().body})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hooks.slack.com/services", server.uri());
        let channel = WebhookChannel::from_url(&url).unwrap().with_retry(no_delay());
        assert_eq!(channel.kind(), WebhookKind::Slack);
        channel.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel =
            WebhookChannel::new(WebhookKind::Discord, server.uri()).with_retry(no_delay());
        channel.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let channel =
            WebhookChannel::new(WebhookKind::Lark, server.uri()).with_retry(no_delay());
        let result = channel.send(&message()).await;
        assert!(matches!(result, Err(MonitorError::AlertDelivery(_))));
    }

    #[test]
    fn test_from_url_unknown() {
        assert!(WebhookChannel::from_url("https://example.org/hook").is_none());
    }

    #[test]
    fn test_email_channel_requires_full_config() {
        let config = EmailConfig {
            smtp_endpoint: "smtp.example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EmailChannel::new(&config),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_email_channel_rejects_bad_address() {
        let config = EmailConfig {
            smtp_endpoint: "smtp.example.com".to_string(),
            smtp_port: 465,
            sender_addr: "not an address".to_string(),
            smtp_password: "secret".to_string(),
            receiver: vec!["ops@example.com".to_string()],
        };
        assert!(matches!(
            EmailChannel::new(&config),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_email_channel_builds() {
        let config = EmailConfig {
            smtp_endpoint: "smtp.example.com".to_string(),
            smtp_port: 587,
            sender_addr: "alerts@example.com".to_string(),
            smtp_password: "secret".to_string(),
            receiver: vec!["ops@example.com".to_string(), "dev@example.com".to_string()],
        };
        let channel = EmailChannel::new(&config).unwrap();
        assert_eq!(channel.name(), "email");
        assert_eq!(channel.to.len(), 2);
    }
}
