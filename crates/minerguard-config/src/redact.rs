//! Masking helpers for displaying configuration.

use tracing::warn;
use url::Url;

/// `123456@cess.network` becomes `***456@cess.network`. Short values pass through.
pub fn mask_email(addr: &str) -> String {
    if addr.chars().count() < 5 {
        return addr.to_string();
    }
    let rest: String = addr.chars().skip(3).collect();
    format!("***{}", rest)
}

/// Reduce a webhook URL to `scheme://host/***`.
///
/// Returns an empty string when the URL cannot be parsed or its host has no
/// top-level domain.
pub fn redact_webhook_url(input: &str) -> String {
    let parsed = match Url::parse(input) {
        Ok(url) => url,
        Err(e) => {
            warn!("Failed to parse webhook url: {}", e);
            return String::new();
        }
    };
    let host = parsed.host_str().unwrap_or_default();
    if !host.contains('.') {
        warn!("No top-level domain found in webhook url");
        return String::new();
    }
    format!("{}://{}/***", parsed.scheme(), host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("123456@cess.network"), "***456@cess.network");
    }

    #[test]
    fn test_mask_email_short() {
        assert_eq!(mask_email("a@b"), "a@b");
    }

    #[test]
    fn test_redact_webhook_url() {
        let redacted = redact_webhook_url(
            "https://open.larksuite.com/open-apis/bot/v2/hook/4bb9bfc7-dat4-41g9",
        );
        assert_eq!(redacted, "https://open.larksuite.com/***");
    }

    #[test]
    fn test_redact_webhook_url_invalid() {
        assert_eq!(redact_webhook_url("not a url"), "");
        assert_eq!(redact_webhook_url("http://localhost/hook"), "");
    }
}
