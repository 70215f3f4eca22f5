use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::alert::{Alert, AlertLevel};
use crate::config::NotifyConfig;
use crate::webhook::WebhookSink;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub event: &'static str,
    pub level: AlertLevel,
    pub text: String,
    pub recipient: Option<String>,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()>;
}

/// Writes alerts to the process log only.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        match message.level {
            AlertLevel::Critical | AlertLevel::Warning => {
                warn!(event = message.event, "alert: {}", message.text)
            }
            AlertLevel::Info => info!(event = message.event, "alert: {}", message.text),
        }
        Ok(())
    }
}

/// Keeps every message in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(|m| m.event).collect()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Fans an alert out to every sink. Delivery failures are logged and dropped.
#[derive(Clone)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    environment: String,
    recipient: Option<String>,
}

impl Notifier {
    pub fn new(
        sinks: Vec<Arc<dyn NotificationSink>>,
        environment: impl Into<String>,
        recipient: Option<String>,
    ) -> Self {
        Self {
            sinks,
            environment: environment.into(),
            recipient,
        }
    }

    /// Webhook sink when a URL is configured, always a log sink.
    pub fn from_config(config: &NotifyConfig, environment: &str) -> anyhow::Result<Self> {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
        if config.webhook_url().is_some() {
            sinks.push(Arc::new(WebhookSink::new(config)?));
        } else {
            info!("no alert webhook configured, alerts go to the log only");
        }
        Ok(Self::new(sinks, environment, config.recipient.clone()))
    }

    pub fn log_only(environment: &str) -> Self {
        Self::new(vec![Arc::new(LogSink)], environment, None)
    }

    pub async fn notify(&self, alert: &Alert) {
        let message = OutboundMessage {
            event: alert.event(),
            level: alert.level(),
            text: alert.render(&self.environment),
            recipient: self.recipient.clone(),
            environment: self.environment.clone(),
            timestamp: Utc::now(),
        };
        for sink in &self.sinks {
            if let Err(err) = sink.send(&message).await {
                warn!(
                    sink = sink.name(),
                    event = message.event,
                    "alert delivery failed: {err:#}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _message: &OutboundMessage) -> anyhow::Result<()> {
            anyhow::bail!("webhook returned 500")
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_delivery_to_others() {
        let recorder = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(
            vec![Arc::new(FailingSink), recorder.clone()],
            "test",
            Some("5511000".to_string()),
        );
        notifier
            .notify(&Alert::RecoverySucceeded {
                target: "svc".to_string(),
            })
            .await;
        let messages = recorder.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, "recovery_succeeded");
        assert_eq!(messages[0].recipient.as_deref(), Some("5511000"));
        assert!(messages[0].text.contains("(test)"));
    }

    #[test]
    fn from_config_without_webhook_is_log_only() {
        let notifier = Notifier::from_config(&NotifyConfig::default(), "dev").expect("notifier");
        assert_eq!(notifier.sinks.len(), 1);
        assert_eq!(notifier.sinks[0].name(), "log");
    }
}
