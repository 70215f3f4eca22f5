//! Process logging and structured lifecycle events.
//!
//! Long-running processes log to the console and to a daily JSONL file under
//! `logs/`, named `sentinel.<process>.<date>.jsonl`. One-shot CLI commands log
//! to stderr only.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Server,
    Watchdog,
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Server => "server",
            ProcessKind::Watchdog => "watchdog",
            ProcessKind::Cli => "cli",
        }
    }

    fn file_prefix(self) -> String {
        format!("sentinel.{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// Fields of one `sentinel.obs` line. `error_code` carries the stable code of
/// a classified failure (`CheckError::code()`, trigger failures).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub instance: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replace a secret with its length and a short hash so log lines stay correlatable.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} hash={}]", trimmed.len(), short_hash(trimmed))
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

macro_rules! obs_line {
    ($mac:ident, $process:expr, $event:expr) => {
        tracing::$mac!(
            target: "sentinel.obs",
            process = $process.as_str(),
            component = $event.component,
            event = $event.event,
            instance = $event.instance.unwrap_or(""),
            status = $event.status.unwrap_or(""),
            error_code = $event.error_code.unwrap_or(""),
            detail = $event.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => obs_line!(error, process, event),
        Level::WARN => obs_line!(warn, process, event),
        Level::DEBUG | Level::TRACE => obs_line!(debug, process, event),
        _ => obs_line!(info, process, event),
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Console (compact) plus daily JSONL file logging. Keep the guard alive for
/// the lifetime of the process or buffered lines are lost.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    cleanup_old_jsonl(logs_dir, process.as_str(), retention_days)?;

    let prefix = process.file_prefix();
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix.clone())
        .filename_suffix("jsonl")
        .build(logs_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(tracing_subscriber::fmt::layer().compact().with_target(true))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .ok();

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.display().to_string(),
            prefix,
            retention_days,
            initialized_at: Utc::now(),
        },
    ))
}

/// Console-only logging for one-shot CLI commands.
pub fn init_console_logging() {
    tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok();
}

/// Date encoded in `sentinel.<process>.YYYY-MM-DD.jsonl`, if the name belongs
/// to `process`.
fn jsonl_date(name: &str, process: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix("sentinel.")?
        .strip_prefix(process)?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn cleanup_old_jsonl(logs_dir: &Path, process: &str, retention_days: u64) -> anyhow::Result<()> {
    let days = i64::try_from(retention_days).unwrap_or(i64::MAX / 86_400);
    let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
    for path in fs::read_dir(logs_dir)?.flatten().map(|e| e.path()) {
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| jsonl_date(n, process))
            .is_some_and(|date| date < cutoff);
        if expired && path.is_file() {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

pub fn logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}
