//! Configuration loader.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Environment variables that take priority over the config file.
pub const ENV_PORT: &str = "MINERGUARD_PORT";
pub const ENV_IS_EXTERNAL: &str = "MINERGUARD_IS_EXTERNAL";
pub const ENV_SCRAPE_INTERVAL: &str = "MINERGUARD_SCRAPE_INTERVAL";
pub const ENV_USERNAME: &str = "MINERGUARD_USERNAME";
pub const ENV_PASSWORD: &str = "MINERGUARD_PASSWORD";
pub const ENV_JWT_SECRET: &str = "MINERGUARD_JWT_SECRET";
pub const ENV_TOKEN_EXPIRY: &str = "MINERGUARD_TOKEN_EXPIRY";

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        Self::load_with(content, |key| std::env::var(key).ok())
    }

    /// Load configuration, resolving overrides through `lookup`.
    pub fn load_with<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = Self::expand_env_vars(content, &lookup)?;
        let config: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yml::from_str(&expanded)?
        };
        Ok(Self::apply_overrides(config, &lookup).normalize())
    }

    /// Apply `MINERGUARD_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides<F>(mut config: Config, lookup: &F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT).and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(external) = lookup(ENV_IS_EXTERNAL) {
            config.external = external.eq_ignore_ascii_case("true");
        }
        if let Some(interval) = lookup(ENV_SCRAPE_INTERVAL).and_then(|v| v.parse().ok()) {
            config.scrape_interval = interval;
        }
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            config.auth.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|v| !v.is_empty()) {
            config.auth.password = password;
        }
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|v| !v.is_empty()) {
            config.auth.jwt_secret_key = secret;
        }
        if let Some(expiry) = lookup(ENV_TOKEN_EXPIRY).and_then(|v| v.parse().ok()) {
            config.auth.token_expiry = expiry;
        }
        config
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars<F>(content: &str, lookup: &F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value =
                lookup(var_name).ok_or_else(|| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.config`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}
