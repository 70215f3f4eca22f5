use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub healthy: bool,
    pub detail: String,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> ProbeResult;
}

/// Healthy iff `GET url` answers 200 within the timeout.
pub struct HttpHealthProbe {
    url: String,
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> ProbeResult {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => ProbeResult {
                healthy: true,
                detail: "status 200".to_string(),
            },
            Ok(resp) => ProbeResult {
                healthy: false,
                detail: format!("status {}", resp.status().as_u16()),
            },
            Err(err) if err.is_timeout() => ProbeResult {
                healthy: false,
                detail: "request timed out".to_string(),
            },
            Err(err) => ProbeResult {
                healthy: false,
                detail: err.to_string(),
            },
        }
    }
}
