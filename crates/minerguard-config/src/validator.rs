//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;
use crate::webhook::WebhookKind;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Every error as one [`ConfigError::Invalid`], if there are any.
    pub fn error(&self) -> Option<ConfigError> {
        if self.is_valid() {
            return None;
        }
        Some(ConfigError::Invalid(
            self.errors
                .iter()
                .map(|e| format!("{}: {}", e.path, e.message))
                .collect(),
        ))
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_hosts(config, &mut result);
        Self::validate_chain(config, &mut result);
        Self::validate_alert(config, &mut result);

        result
    }

    fn validate_hosts(config: &Config, result: &mut ValidationResult) {
        if config.hosts.is_empty() {
            result.add_warning(ValidationWarning::new(
                "hosts",
                "No hosts configured, nothing will be monitored",
            ));
        }

        let mut seen = HashSet::new();
        for (i, host) in config.hosts.iter().enumerate() {
            if host.ip.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("hosts[{}].ip", i),
                    "Host ip cannot be empty",
                ));
            }
            if host.port == 0 {
                result.add_error(ValidationError::new(
                    format!("hosts[{}].port", i),
                    "Port cannot be 0",
                ));
            }
            if !seen.insert(host.ip.as_str()) {
                result.add_warning(ValidationWarning::new(
                    format!("hosts[{}].ip", i),
                    format!("Host {} is listed more than once, only one monitor runs", host.ip),
                ));
            }
        }
    }

    fn validate_chain(config: &Config, result: &mut ValidationResult) {
        if config.rpc_endpoints.is_empty() {
            result.add_error(ValidationError::new(
                "rpcEndpoints",
                "At least one chain RPC endpoint is required",
            ));
        }

        for (i, url) in config.rpc_endpoints.iter().enumerate() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error(ValidationError::new(
                    format!("rpcEndpoints[{}]", i),
                    "RPC endpoint must start with http:// or https://",
                ));
            }
        }

        if config.miner_image.trim().is_empty() {
            result.add_error(ValidationError::new(
                "minerImage",
                "Miner image cannot be empty",
            ));
        }
    }

    fn validate_alert(config: &Config, result: &mut ValidationResult) {
        let alert = &config.alert;

        for (i, url) in alert.webhook.iter().enumerate() {
            if WebhookKind::from_url(url).is_none() {
                result.add_warning(ValidationWarning::new(
                    format!("alert.webhook[{}]", i),
                    "Unrecognized webhook provider, no alerts will be sent to it",
                ));
            }
        }

        if alert.email.is_partial() {
            result.add_warning(ValidationWarning::new(
                "alert.email",
                "Email settings are incomplete, mail alerts are disabled",
            ));
        }

        if alert.enable && alert.webhook.is_empty() && !alert.email.is_configured() {
            result.add_warning(ValidationWarning::new(
                "alert",
                "Alerting is enabled but no webhook or email channel is configured",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
