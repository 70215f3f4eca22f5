use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sentinel_core::{ConfigStore, Reconciler, SentinelConfig};
use sentinel_directory::CodeChatClient;
use sentinel_notify::Notifier;
use sentinel_observability::{
    emit_event, init_console_logging, init_process_logging, logs_dir_from_root,
    ObservabilityEvent, ProcessKind,
};
use sentinel_server::{serve, AppState};
use sentinel_types::{UserRecord, UserStatus};
use sentinel_users::{SqliteUserDirectory, UserDirectory};
use sentinel_watchdog::{
    CommandRecoveryTrigger, HttpHealthProbe, HttpRecoveryTrigger, RecoveryCredentials,
    RecoveryTrigger, UnconfiguredTrigger, WatchdogPolicy, WatchdogRunner,
};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Keeps CodeChat instances connected and watches the service health")]
struct Cli {
    /// JSON config file; env vars and flags override it.
    #[arg(long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// HTTP API plus the reconciliation scheduler.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value_t = false)]
        no_scheduler: bool,
    },
    /// Poll the health endpoint and drive recovery.
    Watchdog {
        #[arg(long)]
        target: Option<String>,
        /// Single poll, print the resulting phase and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// One reconciliation pass, printed as JSON.
    Check {
        #[arg(long)]
        instance: Option<String>,
    },
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
    /// Print the effective config and each layer, secrets redacted.
    Config,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Upsert {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mobile_number: Option<String>,
        #[arg(long)]
        instance_id: Option<String>,
        #[arg(long)]
        instance_name: Option<String>,
        #[arg(long, default_value = "OFFLINE")]
        status: String,
    },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            host,
            port,
            no_scheduler,
        } => {
            let mut overrides = Map::new();
            if host.is_some() || port.is_some() {
                let mut server = Map::new();
                if let Some(host) = host {
                    server.insert("host".to_string(), json!(host));
                }
                if let Some(port) = port {
                    server.insert("port".to_string(), json!(port));
                }
                overrides.insert("server".to_string(), Value::Object(server));
            }
            if no_scheduler {
                overrides.insert("scheduler".to_string(), json!({ "enabled": false }));
            }
            let store = ConfigStore::load(cli.config.as_deref(), Some(Value::Object(overrides))).await?;
            let config = store.get();
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Server, &logs_dir(config), config.logging.retention_days)?;
            logging_initialized(ProcessKind::Server);
            info!("server logging initialized: {:?}", log_info);
            info!("effective config: {}", store.effective_value());

            let reconciler = Arc::new(build_reconciler(config).await?);
            let notifier = Notifier::from_config(&config.notify, &config.environment)?;
            let state = AppState::new(
                reconciler,
                notifier,
                config.environment.clone(),
                config.scheduler.clone(),
            );
            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .context("invalid host or port")?;
            info!("listening on http://{addr}");
            serve(addr, state).await?;
        }
        Command::Watchdog { target, once } => {
            let overrides = target.map(|t| json!({ "watchdog": { "target_url": t } }));
            let store = ConfigStore::load(cli.config.as_deref(), overrides).await?;
            let config = store.get();
            let (_log_guard, log_info) = init_process_logging(
                ProcessKind::Watchdog,
                &logs_dir(config),
                config.logging.retention_days,
            )?;
            logging_initialized(ProcessKind::Watchdog);
            info!("watchdog logging initialized: {:?}", log_info);

            let runner = Arc::new(build_watchdog(config)?);
            if once {
                let report = runner.poll_once().await;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "healthy": report.healthy,
                        "phase": report.phase.as_str(),
                        "consecutiveFailures": runner.state().consecutive_failures,
                    }))?
                );
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(runner.run(cancel.clone()));
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested");
            cancel.cancel();
            handle.await?;
        }
        Command::Check { instance } => {
            init_console_logging();
            let store = ConfigStore::load(cli.config.as_deref(), None).await?;
            let reconciler = build_reconciler(store.get()).await?;
            match instance {
                Some(name) => {
                    let result = reconciler.reconcile_one(&name).await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                None => {
                    let outcome = reconciler.reconcile_all().await;
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    if !outcome.success {
                        anyhow::bail!("reconciliation failed: {}", outcome.message);
                    }
                }
            }
        }
        Command::Config => {
            init_console_logging();
            let store = ConfigStore::load(cli.config.as_deref(), None).await?;
            let report = json!({
                "file": store.file_path().map(|p| p.display().to_string()),
                "effective": store.effective_value(),
                "layers": store.layers_value(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::User { action } => {
            init_console_logging();
            let store = ConfigStore::load(cli.config.as_deref(), None).await?;
            let users = open_users(store.get()).await?;
            match action {
                UserCommand::Upsert {
                    id,
                    name,
                    mobile_number,
                    instance_id,
                    instance_name,
                    status,
                } => {
                    let status = UserStatus::parse(&status)
                        .with_context(|| format!("status must be ONLINE or OFFLINE, got `{status}`"))?;
                    let record = UserRecord {
                        id: id.unwrap_or_default(),
                        name,
                        mobile_number,
                        instance_id,
                        instance_name,
                        status,
                        updated_at: chrono::Utc::now(),
                    };
                    let saved = users.upsert(record).await?;
                    println!("{}", serde_json::to_string_pretty(&saved)?);
                }
                UserCommand::List => {
                    let all = users.list_users().await?;
                    println!("{}", serde_json::to_string_pretty(&all)?);
                }
            }
        }
    }

    Ok(())
}

fn logs_dir(config: &SentinelConfig) -> PathBuf {
    match config.logging.dir.as_deref() {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => logs_dir_from_root(Path::new(".")),
    }
}

fn logging_initialized(process: ProcessKind) {
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "main",
            status: Some("ok"),
            detail: Some("jsonl logging initialized"),
            ..ObservabilityEvent::default()
        },
    );
}

async fn open_users(config: &SentinelConfig) -> anyhow::Result<SqliteUserDirectory> {
    let path = Path::new(&config.store.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteUserDirectory::open(path)
        .await
        .with_context(|| format!("failed to open user store {}", path.display()))
}

async fn build_reconciler(config: &SentinelConfig) -> anyhow::Result<Reconciler> {
    if config.codechat.api_key.trim().is_empty() {
        warn!("codechat.api_key is empty, instance listing will likely be rejected");
    }
    let directory = CodeChatClient::new(config.codechat.client_config())?;
    info!("codechat api at {}", directory.base_url());
    let users = open_users(config).await?;
    Ok(Reconciler::new(
        Arc::new(directory),
        Arc::new(users),
        Duration::from_millis(config.reconciler.delay_ms),
    ))
}

fn build_watchdog(config: &SentinelConfig) -> anyhow::Result<WatchdogRunner> {
    let settings = &config.watchdog;
    let probe = HttpHealthProbe::new(
        settings.target_url.clone(),
        Duration::from_millis(settings.request_timeout_ms),
    )?;
    let recovery = &config.recovery;
    let credentials = RecoveryCredentials {
        username: recovery.username.clone(),
        password: recovery.password.clone(),
    };
    let timeout = Duration::from_millis(recovery.timeout_ms);
    let trigger: Arc<dyn RecoveryTrigger> = match (recovery.command.as_deref(), recovery.url.as_deref()) {
        (Some(command), _) if !command.trim().is_empty() => {
            Arc::new(CommandRecoveryTrigger::new(command, credentials, timeout)?)
        }
        (_, Some(url)) if !url.trim().is_empty() => {
            Arc::new(HttpRecoveryTrigger::new(url, credentials, timeout)?)
        }
        _ => {
            warn!("no recovery command or url configured, recovery attempts will only alert");
            Arc::new(UnconfiguredTrigger)
        }
    };
    let policy = WatchdogPolicy {
        target: settings.target_url.clone(),
        cooldown: Duration::from_secs(settings.cooldown_secs),
        confirmation_wait: Duration::from_secs(settings.confirmation_wait_secs),
        escalation_threshold: settings.escalation_threshold,
    };
    let notifier = Notifier::from_config(&config.notify, &config.environment)?;
    info!(
        target = probe.url(),
        trigger = trigger.name(),
        "watchdog polling every {}s",
        settings.interval_secs
    );
    Ok(WatchdogRunner::new(
        policy,
        Duration::from_secs(settings.interval_secs),
        Arc::new(probe),
        trigger,
        notifier,
    )
    .with_alert_timeout(Duration::from_millis(config.notify.timeout_ms) + Duration::from_secs(5)))
}
