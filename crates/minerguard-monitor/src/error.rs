//! Monitor errors.

use thiserror::Error;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Alert is missing its time, host or description.
    #[error("Alert is missing required field: {0}")]
    IncompleteAlert(&'static str),

    /// Alert delivery failed.
    #[error("Alert delivery failed: {0}")]
    AlertDelivery(String),

    /// Mail composition or transport error.
    #[error("Email error: {0}")]
    Email(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
