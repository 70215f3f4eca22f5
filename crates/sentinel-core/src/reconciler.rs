//! Instance reconciliation engine.
//!
//! A pass lists every instance, keeps the ONLINE ones and walks them one at a
//! time in listing order, pausing between instances. Per instance the detail
//! fetch decides the action:
//!
//! | detail                                  | action                         |
//! |-----------------------------------------|--------------------------------|
//! | gateway answered with an error          | connect, logout, mark offline  |
//! | no connection state                     | connect, logout, mark offline  |
//! | `close`                                 | reconnect, logout if QR needed |
//! | anything else                           | nothing                        |
//! | transport or decode failure             | skip                           |
//!
//! Nothing inside a pass is returned as an error. Mutating operations share
//! one run-lock so two passes never race on the same tokens.

use std::sync::Arc;
use std::time::Duration;

use sentinel_directory::{DirectoryError, ErrorKind, InstanceDirectory};
use sentinel_types::{
    BulkLogoutOutcome, InstanceAction, InstanceCheckResult, InstanceSummary,
    Liveness, ReconciliationOutcome, ReconciliationStatistics, RemediationOutcome,
    RemediationStep, UserLogoutResult, UserLookup,
};
use sentinel_users::{UserDirectory, UserStoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::remediation::{Remediator, Saga};

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("instance {name} is not online (status {status})")]
    NotOnline { name: String, status: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("instance directory unavailable: {0}")]
    Directory(#[from] DirectoryError),

    #[error("user directory error: {0}")]
    UserStore(#[from] UserStoreError),
}

impl CheckError {
    /// HTTP status the API surface answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            CheckError::NotFound(_) => 404,
            CheckError::NotOnline { .. } | CheckError::InvalidInput(_) => 400,
            CheckError::Directory(_) => 503,
            CheckError::UserStore(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CheckError::NotFound(_) => "NOT_FOUND",
            CheckError::NotOnline { .. } => "INSTANCE_NOT_ONLINE",
            CheckError::InvalidInput(_) => "INVALID_INPUT",
            CheckError::Directory(_) => "DIRECTORY_UNAVAILABLE",
            CheckError::UserStore(_) => "USER_STORE_ERROR",
        }
    }
}

pub struct Reconciler {
    pub(crate) directory: Arc<dyn InstanceDirectory>,
    pub(crate) users: Arc<dyn UserDirectory>,
    delay: Duration,
    run_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn InstanceDirectory>,
        users: Arc<dyn UserDirectory>,
        delay: Duration,
    ) -> Self {
        Self {
            directory,
            users,
            delay,
            run_lock: Mutex::new(()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True while a mutating operation holds the run-lock.
    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Full pass. Waits for any operation already in flight.
    pub async fn reconcile_all(&self) -> ReconciliationOutcome {
        let _guard = self.run_lock.lock().await;
        self.run_pass().await
    }

    /// Full pass unless one is already running, in which case `None`.
    pub async fn try_reconcile_all(&self) -> Option<ReconciliationOutcome> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!("reconciliation pass already in flight, skipping");
            return None;
        };
        Some(self.run_pass().await)
    }

    /// Check a single instance by name. Unknown names are `NotFound`, instances
    /// that are not ONLINE are `NotOnline`.
    pub async fn reconcile_one(&self, name: &str) -> Result<InstanceCheckResult, CheckError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CheckError::InvalidInput("instance name is required".to_string()));
        }
        let _guard = self.run_lock.lock().await;
        let matches = match self.directory.find_instances(name).await {
            Ok(matches) => matches,
            Err(err) if err.kind() == ErrorKind::InstanceMissing => {
                return Err(CheckError::NotFound(format!("instance {name}")));
            }
            Err(err) => return Err(err.into()),
        };
        let instance = matches
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| CheckError::NotFound(format!("instance {name}")))?;
        if !instance.is_online() {
            return Err(CheckError::NotOnline {
                name: instance.name,
                status: instance.connection_status.as_str(),
            });
        }
        Ok(self.check_instance(&instance).await)
    }

    /// Force-logout every ONLINE instance whose connection state is absent.
    pub async fn logout_indeterminate(&self) -> Result<BulkLogoutOutcome, CheckError> {
        let _guard = self.run_lock.lock().await;
        let instances = self.directory.list_instances().await?;
        let mut outcome = BulkLogoutOutcome {
            total: count(instances.len()),
            ..BulkLogoutOutcome::default()
        };
        let remediator = self.remediator();
        let candidates: Vec<(&InstanceSummary, &str)> = instances
            .iter()
            .filter(|i| i.is_online())
            .filter_map(|i| i.token().map(|t| (i, t)))
            .collect();

        for (idx, (instance, token)) in candidates.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.delay).await;
            }
            outcome.checked += 1;
            let detail = match self.directory.instance_detail(&instance.name, token).await {
                Ok(detail) => detail,
                Err(err) => {
                    warn!(instance = %instance.name, kind = err.kind().as_str(), "detail fetch failed: {err}");
                    outcome.failed += 1;
                    outcome.results.push(base_result(
                        instance,
                        InstanceAction::Skip,
                        RemediationOutcome::skipped(err.to_string()),
                        format!("detail fetch failed: {err}"),
                    ));
                    continue;
                }
            };
            if detail.liveness() != Liveness::Absent {
                continue;
            }
            outcome.indeterminate += 1;
            let remediation = remediator.force_logout(instance, token).await;
            let logged_out = remediation.step_succeeded(RemediationStep::Logout);
            if logged_out {
                outcome.logged_out += 1;
            } else {
                outcome.failed += 1;
            }
            let mut result = base_result(
                instance,
                InstanceAction::ForceLogout,
                remediation,
                if logged_out {
                    "indeterminate connection state, logged out".to_string()
                } else {
                    "indeterminate connection state, logout failed".to_string()
                },
            );
            result.liveness = Some(Liveness::Absent);
            result.needs_reconnection = true;
            result.logged_out = logged_out;
            outcome.results.push(result);
        }
        info!(
            total = outcome.total,
            indeterminate = outcome.indeterminate,
            logged_out = outcome.logged_out,
            failed = outcome.failed,
            "bulk logout of indeterminate instances finished"
        );
        Ok(outcome)
    }

    /// Log out the instance bound to one user and mark the user offline.
    pub async fn logout_user(&self, lookup: &UserLookup) -> Result<UserLogoutResult, CheckError> {
        let _guard = self.run_lock.lock().await;
        let user = self
            .users
            .find(lookup)
            .await?
            .ok_or_else(|| CheckError::NotFound(format!("user {}", lookup.describe())))?;
        let instance_id = user
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CheckError::NotFound(format!("user {} has no instance", user.id)))?;
        let instance = self
            .directory
            .list_instances()
            .await?
            .into_iter()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| CheckError::NotFound(format!("instance {instance_id}")))?;
        let token = instance.token().ok_or_else(|| {
            CheckError::InvalidInput(format!("instance {} has no auth token", instance.name))
        })?;

        let remediator = self.remediator();
        let mut saga = Saga::new();
        remediator.connect(&mut saga, &instance, token).await;
        if let Err(err) = self.directory.logout(&instance.name, token).await {
            warn!(instance = %instance.name, kind = err.kind().as_str(), "user instance logout failed: {err}");
            return Err(err.into());
        }
        saga.record::<String>(RemediationStep::Logout, Ok(()));
        let status_updated = remediator.mark_offline(&mut saga, &instance).await;
        info!(instance = %instance.name, user = %user.id, status_updated, "user instance logged out");

        Ok(UserLogoutResult {
            user_id: user.id,
            instance_id: instance.id,
            instance_name: instance.name,
            logged_out: true,
            status_updated,
            remediation: saga.finish(),
        })
    }

    fn remediator(&self) -> Remediator<'_> {
        Remediator {
            directory: self.directory.as_ref(),
            users: self.users.as_ref(),
        }
    }

    async fn run_pass(&self) -> ReconciliationOutcome {
        let instances = match self.directory.list_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                warn!(kind = err.kind().as_str(), "instance listing failed: {err}");
                return ReconciliationOutcome::failed(err.to_string());
            }
        };
        let online: Vec<&InstanceSummary> = instances.iter().filter(|i| i.is_online()).collect();
        if online.is_empty() {
            info!(listed = instances.len(), "no online instances to check");
            return ReconciliationOutcome::no_online_instances(instances.len());
        }

        let mut stats = ReconciliationStatistics {
            total: count(instances.len()),
            online: count(online.len()),
            ..ReconciliationStatistics::default()
        };
        let mut results = Vec::with_capacity(online.len());
        for (idx, instance) in online.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.check_instance(instance).await;
            tally(&mut stats, &result);
            results.push(result);
        }

        let message = format!(
            "checked {} online instances: {} open, {} closed, {} reconnected, {} logged out",
            stats.online,
            stats.open_connections,
            stats.closed_connections,
            stats.reconnected,
            stats.logged_out
        );
        info!(
            total = stats.total,
            online = stats.online,
            open = stats.open_connections,
            closed = stats.closed_connections,
            reconnected = stats.reconnected,
            logged_out = stats.logged_out,
            "reconciliation pass finished"
        );
        ReconciliationOutcome {
            success: true,
            message,
            statistics: stats,
            error: None,
            results,
            timestamp: chrono::Utc::now(),
        }
    }

    async fn check_instance(&self, instance: &InstanceSummary) -> InstanceCheckResult {
        let Some(token) = instance.token() else {
            debug!(instance = %instance.name, "no auth token, skipping");
            return base_result(
                instance,
                InstanceAction::Skip,
                RemediationOutcome::skipped("no auth token"),
                "no auth token".to_string(),
            );
        };

        let detail = match self.directory.instance_detail(&instance.name, token).await {
            Ok(detail) => detail,
            Err(err) if err.is_remote_reply() => {
                warn!(
                    instance = %instance.name,
                    kind = err.kind().as_str(),
                    "instance listed ONLINE but detail failed, forcing logout: {err}"
                );
                return self.force_logout_result(instance, token, None, format!("detail failed: {err}")).await;
            }
            Err(err) => {
                warn!(instance = %instance.name, kind = err.kind().as_str(), "detail fetch failed, skipping: {err}");
                return base_result(
                    instance,
                    InstanceAction::Skip,
                    RemediationOutcome::skipped(err.to_string()),
                    format!("detail fetch failed: {err}"),
                );
            }
        };

        let state = detail.connection_state();
        match detail.liveness() {
            Liveness::Open => {
                let mut result = base_result(
                    instance,
                    InstanceAction::None,
                    RemediationOutcome::skipped("connection open"),
                    "connection open".to_string(),
                );
                result.connection_state = state;
                result.liveness = Some(Liveness::Open);
                result
            }
            Liveness::Absent => {
                warn!(instance = %instance.name, "no connection state reported, forcing logout");
                self.force_logout_result(
                    instance,
                    token,
                    Some(Liveness::Absent),
                    "connection state absent".to_string(),
                )
                .await
            }
            Liveness::Closed => {
                let mut result = self.reconnect(instance, token).await;
                result.connection_state = state;
                result
            }
        }
    }

    async fn force_logout_result(
        &self,
        instance: &InstanceSummary,
        token: &str,
        liveness: Option<Liveness>,
        reason: String,
    ) -> InstanceCheckResult {
        let remediation = self.remediator().force_logout(instance, token).await;
        let logged_out = remediation.step_succeeded(RemediationStep::Logout);
        let message = if logged_out {
            format!("{reason}, logged out")
        } else {
            format!("{reason}, logout failed")
        };
        let mut result = base_result(instance, InstanceAction::ForceLogout, remediation, message);
        result.liveness = liveness;
        result.needs_reconnection = true;
        result.logged_out = logged_out;
        result
    }

    async fn reconnect(&self, instance: &InstanceSummary, token: &str) -> InstanceCheckResult {
        let reply = match self.directory.connect(&instance.name, token).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(instance = %instance.name, kind = err.kind().as_str(), "reconnect failed: {err}");
                let mut saga = Saga::new();
                saga.record(RemediationStep::Connect, Err(err.to_string()));
                let mut result = base_result(
                    instance,
                    InstanceAction::Reconnect,
                    saga.finish(),
                    format!("connection closed, reconnect failed: {err}"),
                );
                result.liveness = Some(Liveness::Closed);
                result.needs_reconnection = true;
                return result;
            }
        };

        if reply.requires_pairing() {
            info!(instance = %instance.name, "reconnect needs a QR scan, logging out instead");
            let saga = Saga::resume(vec![RemediationStep::Connect]);
            let remediation = self
                .remediator()
                .logout_and_mark_offline(saga, instance, token)
                .await;
            let logged_out = remediation.step_succeeded(RemediationStep::Logout);
            let message = if logged_out {
                "connection closed, pairing required, logged out".to_string()
            } else {
                "connection closed, pairing required, logout failed".to_string()
            };
            let mut result = base_result(
                instance,
                InstanceAction::ReconnectThenLogout,
                remediation,
                message,
            );
            result.liveness = Some(Liveness::Closed);
            result.needs_reconnection = true;
            result.logged_out = logged_out;
            return result;
        }

        info!(instance = %instance.name, "reconnected");
        let mut result = base_result(
            instance,
            InstanceAction::Reconnect,
            RemediationOutcome::FullSuccess {
                completed: vec![RemediationStep::Connect],
            },
            "connection closed, reconnected".to_string(),
        );
        result.liveness = Some(Liveness::Closed);
        result.needs_reconnection = true;
        result.reconnected = true;
        result
    }
}

fn base_result(
    instance: &InstanceSummary,
    action: InstanceAction,
    remediation: RemediationOutcome,
    message: String,
) -> InstanceCheckResult {
    InstanceCheckResult {
        instance_id: instance.id.clone(),
        instance_name: instance.name.clone(),
        connection_status: instance.connection_status,
        connection_state: None,
        liveness: None,
        action,
        needs_reconnection: false,
        reconnected: false,
        logged_out: false,
        remediation,
        message,
    }
}

fn tally(stats: &mut ReconciliationStatistics, result: &InstanceCheckResult) {
    match result.action {
        InstanceAction::None => stats.open_connections += 1,
        InstanceAction::Reconnect | InstanceAction::ReconnectThenLogout => {
            stats.closed_connections += 1
        }
        InstanceAction::ForceLogout | InstanceAction::Skip => {}
    }
    if result.reconnected {
        stats.reconnected += 1;
    }
    if result.logged_out {
        stats.logged_out += 1;
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("delay", &self.delay)
            .field("busy", &self.is_busy())
            .finish()
    }
}
