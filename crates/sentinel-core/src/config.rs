//! Layered configuration.
//!
//! Layers, lowest to highest: built-in defaults, JSON config file, environment,
//! CLI overrides. Each layer is a JSON object deep-merged over the previous
//! one; the merged value is then deserialized into [`SentinelConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sentinel_directory::CodeChatConfig;
use sentinel_notify::NotifyConfig;
use sentinel_observability::redact_text;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CodeChatSettings {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

impl Default for CodeChatSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8084".to_string(),
            api_key: String::new(),
            request_timeout_ms: 15_000,
        }
    }
}

impl CodeChatSettings {
    pub fn client_config(&self) -> CodeChatConfig {
        CodeChatConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcilerSettings {
    /// Pause between two instances of one pass.
    pub delay_ms: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self { delay_ms: 2_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Fire one pass right after startup instead of waiting a full interval.
    pub run_on_start: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogSettings {
    pub target_url: String,
    pub interval_secs: u64,
    pub cooldown_secs: u64,
    pub confirmation_wait_secs: u64,
    pub escalation_threshold: u32,
    pub request_timeout_ms: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            target_url: "http://127.0.0.1:3000/health".to_string(),
            interval_secs: 60,
            cooldown_secs: 1_800,
            confirmation_wait_secs: 120,
            escalation_threshold: 3,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoverySettings {
    /// Automation endpoint that performs re-login and restart.
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Local program run instead of calling `url`.
    pub command: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            command: None,
            timeout_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "sentinel.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: Option<String>,
    pub retention_days: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SentinelConfig {
    pub environment: String,
    pub codechat: CodeChatSettings,
    pub reconciler: ReconcilerSettings,
    pub scheduler: SchedulerSettings,
    pub watchdog: WatchdogSettings,
    pub notify: NotifyConfig,
    pub recovery: RecoverySettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            codechat: CodeChatSettings::default(),
            reconciler: ReconcilerSettings::default(),
            scheduler: SchedulerSettings::default(),
            watchdog: WatchdogSettings::default(),
            notify: NotifyConfig::default(),
            recovery: RecoverySettings::default(),
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SentinelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let base = self.codechat.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("codechat.base_url must be an http(s) url, got `{base}`");
        }
        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than zero");
        }
        if self.watchdog.interval_secs == 0 {
            anyhow::bail!("watchdog.interval_secs must be greater than zero");
        }
        if self.watchdog.escalation_threshold == 0 {
            anyhow::bail!("watchdog.escalation_threshold must be at least 1");
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum EnvKind {
    Text,
    Number,
    Flag,
}

/// Environment variable, dotted config path, value kind.
const ENV_KEYS: &[(&str, &str, EnvKind)] = &[
    ("CODECHAT_API_URL", "codechat.base_url", EnvKind::Text),
    ("CODECHAT_API_KEY", "codechat.api_key", EnvKind::Text),
    ("CODECHAT_TIMEOUT_MS", "codechat.request_timeout_ms", EnvKind::Number),
    ("SENTINEL_DELAY_MS", "reconciler.delay_ms", EnvKind::Number),
    ("SENTINEL_SCHEDULER_ENABLED", "scheduler.enabled", EnvKind::Flag),
    ("SENTINEL_SCHEDULER_INTERVAL_SECS", "scheduler.interval_secs", EnvKind::Number),
    ("SENTINEL_SCHEDULER_RUN_ON_START", "scheduler.run_on_start", EnvKind::Flag),
    ("SENTINEL_WATCHDOG_URL", "watchdog.target_url", EnvKind::Text),
    ("SENTINEL_WATCHDOG_INTERVAL_SECS", "watchdog.interval_secs", EnvKind::Number),
    ("SENTINEL_WATCHDOG_COOLDOWN_SECS", "watchdog.cooldown_secs", EnvKind::Number),
    ("SENTINEL_WATCHDOG_CONFIRM_SECS", "watchdog.confirmation_wait_secs", EnvKind::Number),
    ("SENTINEL_WEBHOOK_URL", "notify.webhook_url", EnvKind::Text),
    ("SENTINEL_WEBHOOK_TOKEN", "notify.webhook_token", EnvKind::Text),
    ("SENTINEL_ALERT_RECIPIENT", "notify.recipient", EnvKind::Text),
    ("SENTINEL_RECOVERY_URL", "recovery.url", EnvKind::Text),
    ("SENTINEL_RECOVERY_USERNAME", "recovery.username", EnvKind::Text),
    ("SENTINEL_RECOVERY_PASSWORD", "recovery.password", EnvKind::Text),
    ("SENTINEL_RECOVERY_COMMAND", "recovery.command", EnvKind::Text),
    ("SENTINEL_DATABASE_URL", "store.path", EnvKind::Text),
    ("SENTINEL_HOST", "server.host", EnvKind::Text),
    ("PORT", "server.port", EnvKind::Number),
    ("SENTINEL_ENV", "environment", EnvKind::Text),
    ("SENTINEL_LOG_DIR", "logging.dir", EnvKind::Text),
];

/// Dotted paths whose values never leave the process unredacted.
const SECRET_PATHS: &[&str] = &[
    "codechat.api_key",
    "notify.webhook_token",
    "recovery.password",
];

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    defaults: Value,
    file: Value,
    env: Value,
    cli: Value,
}

#[derive(Clone)]
pub struct ConfigStore {
    file_path: Option<PathBuf>,
    layers: Arc<ConfigLayers>,
    effective: Arc<SentinelConfig>,
}

impl ConfigStore {
    /// An explicit `path` must exist; without one only env and CLI apply.
    pub async fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => read_json_file(p)
                .await
                .with_context(|| format!("failed to read config file {}", p.display()))?,
            None => empty_object(),
        };
        Self::from_layers(
            path.map(Path::to_path_buf),
            file,
            env_layer(),
            cli_overrides.unwrap_or_else(empty_object),
        )
    }

    fn from_layers(
        file_path: Option<PathBuf>,
        file: Value,
        env: Value,
        cli: Value,
    ) -> anyhow::Result<Self> {
        let defaults = serde_json::to_value(SentinelConfig::default())?;
        let layers = ConfigLayers {
            defaults,
            file,
            env,
            cli,
        };
        let mut merged = layers.defaults.clone();
        deep_merge(&mut merged, &layers.file);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        let effective: SentinelConfig =
            serde_json::from_value(merged).context("invalid configuration")?;
        effective.validate()?;
        Ok(Self {
            file_path,
            layers: Arc::new(layers),
            effective: Arc::new(effective),
        })
    }

    pub fn get(&self) -> &SentinelConfig {
        &self.effective
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Effective configuration with secrets redacted.
    pub fn effective_value(&self) -> Value {
        let mut value = serde_json::to_value(self.effective.as_ref()).unwrap_or_else(|_| empty_object());
        redact_secrets(&mut value);
        value
    }

    /// Every layer separately, secrets redacted.
    pub fn layers_value(&self) -> Value {
        let mut value = json!({
            "defaults": self.layers.defaults,
            "file": self.layers.file,
            "env": self.layers.env,
            "cli": self.layers.cli,
        });
        if let Some(map) = value.as_object_mut() {
            for layer in map.values_mut() {
                redact_secrets(layer);
            }
        }
        value
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).await?;
    let value: Value = serde_json::from_str(&raw)?;
    if !value.is_object() {
        anyhow::bail!("config root must be a JSON object");
    }
    Ok(value)
}

fn env_layer() -> Value {
    env_layer_from(|key| std::env::var(key).ok())
}

fn env_layer_from(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();
    for (key, path, kind) in ENV_KEYS {
        let Some(raw) = lookup(key) else { continue };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = match kind {
            EnvKind::Text => Value::String(raw.to_string()),
            EnvKind::Number => match raw.parse::<u64>() {
                Ok(n) => json!(n),
                Err(_) => {
                    tracing::warn!("ignoring {key}: `{raw}` is not a number");
                    continue;
                }
            },
            EnvKind::Flag => match parse_bool_like(raw) {
                Some(b) => Value::Bool(b),
                None => {
                    tracing::warn!("ignoring {key}: `{raw}` is not a boolean");
                    continue;
                }
            },
        };
        set_path(&mut root, path, value);
    }
    root
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn set_path(root: &mut Value, dotted: &str, value: Value) {
    let mut overlay = value;
    for segment in dotted.rsplit('.') {
        let mut map = Map::new();
        map.insert(segment.to_string(), overlay);
        overlay = Value::Object(map);
    }
    deep_merge(root, &overlay);
}

fn redact_secrets(value: &mut Value) {
    for path in SECRET_PATHS {
        let pointer = format!("/{}", path.replace('.', "/"));
        if let Some(slot) = value.pointer_mut(&pointer) {
            if let Some(text) = slot.as_str() {
                *slot = Value::String(redact_text(text));
            }
        }
    }
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
