//! Webhook sink.
//!
//! Each alert becomes one or more `POST` requests with a JSON body
//! `{number, text, event, level, environment, timestamp}`. Text longer than
//! 4096 characters is split on line boundaries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::NotifyConfig;
use crate::sink::{NotificationSink, OutboundMessage};

const MAX_MESSAGE_LEN: usize = 4096;

/// Split a long message into chunks of at most 4096 characters.
pub fn split_message(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > MAX_MESSAGE_LEN && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > MAX_MESSAGE_LEN {
            let chars = line.chars().collect::<Vec<_>>();
            for piece in chars.chunks(MAX_MESSAGE_LEN) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct WebhookSink {
    url: String,
    token: Option<String>,
    client: Client,
}

impl WebhookSink {
    pub fn new(config: &NotifyConfig) -> anyhow::Result<Self> {
        let url = config
            .webhook_url()
            .ok_or_else(|| anyhow::anyhow!("webhook url is not configured"))?
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            url,
            token: config.webhook_token.clone().filter(|t| !t.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        for chunk in split_message(&message.text) {
            let body = json!({
                "number": message.recipient,
                "text": chunk,
                "event": message.event,
                "level": message.level,
                "environment": message.environment,
                "timestamp": message.timestamp,
            });
            let mut rb = self.client.post(&self.url).json(&body);
            if let Some(token) = &self.token {
                rb = rb.bearer_auth(token);
            }
            let resp = rb.send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                anyhow::bail!("webhook returned {status}: {text}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;
    use crate::sink::Notifier;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[test]
    fn short_messages_are_not_split() {
        assert_eq!(split_message("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn long_messages_split_on_lines_within_limit() {
        let line = format!("{}\n", "a".repeat(1000));
        let text = line.repeat(10);
        let chunks = split_message(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LEN));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "b".repeat(MAX_MESSAGE_LEN * 2 + 5);
        let chunks = split_message(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 5);
    }

    type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn spawn_hook(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(captured): State<Captured>,
                          headers: HeaderMap,
                          Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        captured.lock().await.push((auth, body));
                        status
                    },
                ),
            )
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/hook"), captured)
    }

    #[tokio::test]
    async fn posts_rendered_alert_with_recipient_and_token() {
        let (url, captured) = spawn_hook(StatusCode::OK).await;
        let config = NotifyConfig {
            webhook_url: Some(url),
            recipient: Some("5511999".to_string()),
            webhook_token: Some("hook-secret".to_string()),
            ..NotifyConfig::default()
        };
        let sink = WebhookSink::new(&config).expect("sink");
        let notifier = Notifier::new(vec![Arc::new(sink)], "staging", config.recipient.clone());
        notifier
            .notify(&Alert::AttemptingRecovery {
                target: "https://svc/health".to_string(),
            })
            .await;

        let calls = captured.lock().await;
        assert_eq!(calls.len(), 1);
        let (auth, body) = &calls[0];
        assert_eq!(auth.as_deref(), Some("Bearer hook-secret"));
        assert_eq!(body["number"], "5511999");
        assert_eq!(body["event"], "attempting_recovery");
        assert_eq!(body["level"], "warning");
        assert!(body["text"].as_str().unwrap_or("").contains("staging"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _captured) = spawn_hook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let config = NotifyConfig {
            webhook_url: Some(url),
            ..NotifyConfig::default()
        };
        let sink = WebhookSink::new(&config).expect("sink");
        let message = OutboundMessage {
            event: "service_down",
            level: crate::AlertLevel::Warning,
            text: "down".to_string(),
            recipient: None,
            environment: "test".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let err = sink.send(&message).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
