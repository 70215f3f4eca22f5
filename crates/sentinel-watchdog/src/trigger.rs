//! Recovery triggers. The watchdog treats them as opaque: `Ok` means the
//! recovery procedure was started and finished without reporting an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::process::Command;

#[async_trait]
pub trait RecoveryTrigger: Send + Sync {
    fn name(&self) -> &str;

    async fn trigger(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// POSTs `{action, username, password}` to an automation endpoint.
pub struct HttpRecoveryTrigger {
    url: String,
    credentials: RecoveryCredentials,
    client: Client,
}

impl HttpRecoveryTrigger {
    pub fn new(
        url: impl Into<String>,
        credentials: RecoveryCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            credentials,
            client,
        })
    }
}

#[async_trait]
impl RecoveryTrigger for HttpRecoveryTrigger {
    fn name(&self) -> &str {
        "http"
    }

    async fn trigger(&self) -> anyhow::Result<()> {
        let body = json!({
            "action": "relogin_and_restart",
            "username": self.credentials.username,
            "password": self.credentials.password,
        });
        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("recovery endpoint returned {status}: {text}");
        }
        Ok(())
    }
}

/// Runs a local program. Credentials are passed through the environment as
/// `RECOVERY_USERNAME` and `RECOVERY_PASSWORD`, never on the command line.
pub struct CommandRecoveryTrigger {
    program: String,
    args: Vec<String>,
    credentials: RecoveryCredentials,
    timeout: Duration,
}

impl CommandRecoveryTrigger {
    /// `command` is split on whitespace; the first word is the program.
    pub fn new(
        command: &str,
        credentials: RecoveryCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut words = command.split_whitespace().map(ToString::to_string);
        let program = words
            .next()
            .ok_or_else(|| anyhow::anyhow!("recovery command is empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
            credentials,
            timeout,
        })
    }
}

#[async_trait]
impl RecoveryTrigger for CommandRecoveryTrigger {
    fn name(&self) -> &str {
        "command"
    }

    async fn trigger(&self) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(username) = &self.credentials.username {
            cmd.env("RECOVERY_USERNAME", username);
        }
        if let Some(password) = &self.credentials.password {
            cmd.env("RECOVERY_PASSWORD", password);
        }
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.program, self.timeout))??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }
        Ok(())
    }
}

/// Used when nothing is configured; every attempt fails so the watchdog alerts.
pub struct UnconfiguredTrigger;

#[async_trait]
impl RecoveryTrigger for UnconfiguredTrigger {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn trigger(&self) -> anyhow::Result<()> {
        anyhow::bail!("no recovery trigger configured")
    }
}
