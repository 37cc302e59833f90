//! Persisting monitoring sections back to the configuration file.

use std::fs;
use std::path::Path;

use serde_yml::{Mapping, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::schema::{AlertConfig, Config, HostConfig};

const KEY_HOSTS: &str = "hosts";
const KEY_SCRAPE_INTERVAL: &str = "scrapeInterval";
const KEY_ALERT: &str = "alert";

/// Rewrites the monitoring-related parts of a config file in place.
///
/// Keys outside `hosts`, `scrapeInterval` and `alert` are preserved as read.
pub struct ConfigWriter;

impl ConfigWriter {
    /// Replace hosts, scrape interval and alert settings.
    ///
    /// Incoming email sender and password are ignored; the values from
    /// `current` are kept so a redacted copy can be submitted back safely.
    pub fn replace_monitoring_sections(
        path: &Path,
        incoming: &Config,
        current: &Config,
    ) -> Result<(), ConfigError> {
        let mut root = Self::read_mapping(path)?;

        let mut alert = incoming.alert.clone();
        alert.email.sender_addr = current.alert.email.sender_addr.clone();
        alert.email.smtp_password = current.alert.email.smtp_password.clone();

        root.remove(KEY_HOSTS);
        root.remove(KEY_SCRAPE_INTERVAL);
        root.remove(KEY_ALERT);
        root.insert(Value::from(KEY_HOSTS), Self::hosts_value(&incoming.hosts)?);
        root.insert(
            Value::from(KEY_SCRAPE_INTERVAL),
            Value::from(incoming.scrape_interval),
        );
        root.insert(Value::from(KEY_ALERT), Self::alert_value(&alert)?);

        Self::write_mapping(path, &root)
    }

    /// Flip the global alert switch without touching anything else.
    pub fn set_alert_enabled(path: &Path, enable: bool) -> Result<(), ConfigError> {
        let mut root = Self::read_mapping(path)?;

        let alert = root
            .entry(Value::from(KEY_ALERT))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        match alert {
            Value::Mapping(section) => {
                section.insert(Value::from("enable"), Value::from(enable));
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: KEY_ALERT.to_string(),
                    message: "expected a mapping".to_string(),
                });
            }
        }

        Self::write_mapping(path, &root)
    }

    fn read_mapping(path: &Path) -> Result<Mapping, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Mapping::new());
        }
        match serde_yml::from_str::<Value>(&content)? {
            Value::Mapping(map) => Ok(map),
            _ => Err(ConfigError::InvalidFormat(
                "config root must be a mapping".to_string(),
            )),
        }
    }

    fn write_mapping(path: &Path, root: &Mapping) -> Result<(), ConfigError> {
        let content = serde_yml::to_string(root)?;
        fs::write(path, content)?;
        debug!("Wrote configuration to {}", path.display());
        Ok(())
    }

    fn hosts_value(hosts: &[HostConfig]) -> Result<Value, ConfigError> {
        Ok(serde_yml::to_value(hosts)?)
    }

    fn alert_value(alert: &AlertConfig) -> Result<Value, ConfigError> {
        Ok(serde_yml::to_value(alert)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn reload(file: &NamedTempFile) -> Config {
        let content = fs::read_to_string(file.path()).unwrap();
        ConfigLoader::load_with(&content, no_env).unwrap()
    }

    #[test]
    fn test_replace_monitoring_sections() {
        let file = write_file(
            r#"
port: 9000
scrapeInterval: 1800
hosts:
  - ip: 10.0.0.1
alert:
  enable: false
  email:
    smtpEndpoint: smtp.example.com
    smtpPort: 465
    senderAddr: alerts@example.com
    smtpPassword: real-secret
    receiver:
      - ops@example.com
"#,
        );
        let current = reload(&file);

        let mut incoming = current.redacted();
        incoming.hosts = vec![HostConfig::new("10.0.0.2"), HostConfig::new("10.0.0.3")];
        incoming.scrape_interval = 2400;
        incoming.alert.enable = true;

        ConfigWriter::replace_monitoring_sections(file.path(), &incoming, &current).unwrap();

        let written = reload(&file);
        assert_eq!(written.port, 9000);
        assert_eq!(written.scrape_interval, 2400);
        assert_eq!(written.hosts.len(), 2);
        assert_eq!(written.hosts[1].ip, "10.0.0.3");
        assert!(written.alert.enable);
        assert_eq!(written.alert.email.sender_addr, "alerts@example.com");
        assert_eq!(written.alert.email.smtp_password, "real-secret");
    }

    #[test]
    fn test_set_alert_enabled() {
        let file = write_file("port: 9000\nalert:\n  enable: false\n  webhook:\n    - https://discord.com/api/webhooks/1/a\n");

        ConfigWriter::set_alert_enabled(file.path(), true).unwrap();

        let written = reload(&file);
        assert!(written.alert.enable);
        assert_eq!(written.alert.webhook.len(), 1);
        assert_eq!(written.port, 9000);
    }

    #[test]
    fn test_set_alert_enabled_creates_section() {
        let file = write_file("port: 9000\n");
        ConfigWriter::set_alert_enabled(file.path(), true).unwrap();
        assert!(reload(&file).alert.enable);
    }

    #[test]
    fn test_writer_missing_file() {
        let result = ConfigWriter::set_alert_enabled(Path::new("/nonexistent/config.yaml"), true);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
