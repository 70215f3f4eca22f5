use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConnectionStatus, Liveness, UserRecord, UserStatus};

/// Per-pass counters. Created fresh per pass and never merged across passes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatistics {
    pub total: u32,
    pub online: u32,
    pub open_connections: u32,
    pub closed_connections: u32,
    pub reconnected: u32,
    pub logged_out: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStep {
    Connect,
    Logout,
    MarkOffline,
}

impl RemediationStep {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationStep::Connect => "connect",
            RemediationStep::Logout => "logout",
            RemediationStep::MarkOffline => "mark_offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub step: RemediationStep,
    pub error: String,
}

/// Aggregate of a remediation saga for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    Skipped {
        reason: String,
    },
    PartialFailure {
        completed: Vec<RemediationStep>,
        failed: Vec<StepFailure>,
    },
    FullSuccess {
        completed: Vec<RemediationStep>,
    },
}

impl RemediationOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        RemediationOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn completed_steps(&self) -> &[RemediationStep] {
        match self {
            RemediationOutcome::Skipped { .. } => &[],
            RemediationOutcome::PartialFailure { completed, .. }
            | RemediationOutcome::FullSuccess { completed } => completed,
        }
    }

    pub fn step_succeeded(&self, step: RemediationStep) -> bool {
        self.completed_steps().contains(&step)
    }

    pub fn failures(&self) -> &[StepFailure] {
        match self {
            RemediationOutcome::PartialFailure { failed, .. } => failed,
            _ => &[],
        }
    }

    pub fn is_full_success(&self) -> bool {
        matches!(self, RemediationOutcome::FullSuccess { .. })
    }
}

/// Decision taken for one instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceAction {
    /// Connection open, nothing to do.
    None,
    /// Connection closed, reconnect attempted.
    Reconnect,
    /// Reconnect asked for a QR scan, forced logout instead.
    ReconnectThenLogout,
    /// Liveness missing or detail unreachable, forced logout.
    ForceLogout,
    /// Detail fetch failed for a reason that says nothing about the instance.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCheckResult {
    pub instance_id: String,
    pub instance_name: String,
    pub connection_status: ConnectionStatus,
    pub connection_state: Option<String>,
    pub liveness: Option<Liveness>,
    pub action: InstanceAction,
    pub needs_reconnection: bool,
    pub reconnected: bool,
    pub logged_out: bool,
    pub remediation: RemediationOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationOutcome {
    pub success: bool,
    pub message: String,
    pub statistics: ReconciliationStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<InstanceCheckResult>,
    pub timestamp: DateTime<Utc>,
}

impl ReconciliationOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: format!("failed to fetch instances: {error}"),
            statistics: ReconciliationStatistics::default(),
            error: Some(error),
            results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Not an error: every counter stays at zero.
    pub fn no_online_instances(listed: usize) -> Self {
        Self {
            success: true,
            message: format!("no online instances to check ({listed} listed)"),
            statistics: ReconciliationStatistics::default(),
            error: None,
            results: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkLogoutOutcome {
    pub total: u32,
    pub checked: u32,
    pub indeterminate: u32,
    pub logged_out: u32,
    pub failed: u32,
    pub results: Vec<InstanceCheckResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLogoutResult {
    pub user_id: String,
    pub instance_id: String,
    pub instance_name: String,
    pub logged_out: bool,
    pub status_updated: bool,
    pub remediation: RemediationOutcome,
}

/// Remote-side view of an instance without its credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstanceView {
    pub id: String,
    pub name: String,
    pub connection_status: ConnectionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStats {
    pub user: UserRecord,
    pub instance: Option<RemoteInstanceView>,
    pub liveness: Option<Liveness>,
    pub connection_state: Option<String>,
    /// True when the persisted status agrees with the gateway flag.
    pub status_consistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCrossReference {
    pub instance: RemoteInstanceView,
    pub user_id: Option<String>,
    pub user_status: Option<UserStatus>,
    pub mobile_number: Option<String>,
    pub status_consistent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllInstanceStats {
    pub total_instances: u32,
    pub online_instances: u32,
    pub with_user_record: u32,
    pub without_user_record: u32,
    pub inconsistent: u32,
    pub instances: Vec<InstanceCrossReference>,
}

/// Persisted status agrees with the gateway flag. Unknown gateway status never agrees.
pub fn status_consistent(remote: ConnectionStatus, user: UserStatus) -> bool {
    matches!(
        (remote, user),
        (ConnectionStatus::Online, UserStatus::Online)
            | (ConnectionStatus::Offline, UserStatus::Offline)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statistics_serialize_camel_case() {
        let stats = ReconciliationStatistics {
            total: 3,
            online: 2,
            open_connections: 1,
            closed_connections: 1,
            reconnected: 1,
            logged_out: 0,
        };
        let value = serde_json::to_value(stats).expect("json");
        assert_eq!(value["openConnections"], json!(1));
        assert_eq!(value["loggedOut"], json!(0));
    }

    #[test]
    fn remediation_outcome_tracks_completed_steps() {
        let partial = RemediationOutcome::PartialFailure {
            completed: vec![RemediationStep::Connect, RemediationStep::Logout],
            failed: vec![StepFailure {
                step: RemediationStep::MarkOffline,
                error: "store down".to_string(),
            }],
        };
        assert!(partial.step_succeeded(RemediationStep::Logout));
        assert!(!partial.is_full_success());
        assert_eq!(partial.failures().len(), 1);
        let value = serde_json::to_value(&partial).expect("json");
        assert_eq!(value["outcome"], json!("partial_failure"));
        assert_eq!(value["failed"][0]["step"], json!("mark_offline"));
        assert!(!RemediationOutcome::skipped("open").step_succeeded(RemediationStep::Connect));
    }

    #[test]
    fn failed_outcome_has_zeroed_statistics() {
        let outcome = ReconciliationOutcome::failed("connection refused");
        assert!(!outcome.success);
        assert_eq!(outcome.statistics, ReconciliationStatistics::default());
        assert_eq!(outcome.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn consistency_requires_matching_flags() {
        assert!(status_consistent(ConnectionStatus::Online, UserStatus::Online));
        assert!(!status_consistent(ConnectionStatus::Online, UserStatus::Offline));
        assert!(!status_consistent(ConnectionStatus::Unknown, UserStatus::Offline));
    }
}
