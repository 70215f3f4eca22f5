//! Notification settings.
//!
//! With no webhook URL configured alerts are only logged.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Endpoint that receives one JSON POST per alert.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Phone number or channel id forwarded as `number` in the payload.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(default)]
    pub webhook_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            recipient: None,
            webhook_token: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl NotifyConfig {
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
