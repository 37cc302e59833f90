//! # minerguard Monitor
//!
//! Alert delivery for the minerguard fleet monitor.
//!
//! ## Features
//!
//! - Alert events with a fixed plain-text message layout
//! - Chat webhooks (Discord, Slack, Teams, Lark, DingTalk, WeChat Work)
//! - SMTP mail delivery
//! - Concurrent fan-out with per-channel failure isolation

pub mod error;
pub mod alerts;
pub mod alert_channels;
pub mod alert_manager;

pub use error::MonitorError;
pub use alerts::{AlertChannel, AlertEvent, AlertMessage};
pub use alert_channels::{EmailChannel, RetryPolicy, WebhookChannel};
pub use alert_manager::AlertDispatcher;
