//! Chat webhook providers.

use std::fmt;

/// A chat provider recognized from its webhook URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookKind {
    Discord,
    Slack,
    Teams,
    Lark,
    DingTalk,
    WeChatWork,
}

impl WebhookKind {
    /// Classify a webhook URL by substring, first match wins.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.to_ascii_lowercase();
        if url.contains("discord") {
            Some(Self::Discord)
        } else if url.contains("slack") {
            Some(Self::Slack)
        } else if url.contains("office") {
            Some(Self::Teams)
        } else if url.contains("dingtalk") {
            Some(Self::DingTalk)
        } else if url.contains("larksuite") || url.contains("feishu") {
            Some(Self::Lark)
        } else if url.contains("weixin") || url.contains("qyapi") {
            Some(Self::WeChatWork)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Teams => "teams",
            Self::Lark => "lark",
            Self::DingTalk => "dingtalk",
            Self::WeChatWork => "wechat-work",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
