//! # minerguard Config
//!
//! Configuration management for the minerguard fleet monitor.
//!
//! The configuration lives in a single YAML file. Environment variables
//! override file values, and the monitoring sections can be rewritten in
//! place without disturbing unrelated keys.

mod error;
mod loader;
mod redact;
mod schema;
mod validator;
mod webhook;
mod writer;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use redact::{mask_email, redact_webhook_url};
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
pub use webhook::WebhookKind;
pub use writer::ConfigWriter;
