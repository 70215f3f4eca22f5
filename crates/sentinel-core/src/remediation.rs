//! Remediation saga: `Connect -> Logout -> MarkOffline`.
//!
//! Every step records its own result. A failed connect does not stop the
//! logout; mark-offline only runs after a successful logout and its failure
//! never undoes one.

use sentinel_directory::InstanceDirectory;
use sentinel_types::{
    InstanceSummary, RemediationOutcome, RemediationStep, StepFailure, UserStatus,
};
use sentinel_users::UserDirectory;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct Saga {
    completed: Vec<RemediationStep>,
    failed: Vec<StepFailure>,
}

impl Saga {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Saga that continues after steps already done elsewhere.
    pub(crate) fn resume(completed: Vec<RemediationStep>) -> Self {
        Self {
            completed,
            failed: Vec::new(),
        }
    }

    /// Returns whether the step succeeded.
    pub(crate) fn record<E: std::fmt::Display>(
        &mut self,
        step: RemediationStep,
        result: Result<(), E>,
    ) -> bool {
        match result {
            Ok(()) => {
                self.completed.push(step);
                true
            }
            Err(err) => {
                self.fail(step, err.to_string());
                false
            }
        }
    }

    pub(crate) fn fail(&mut self, step: RemediationStep, error: impl Into<String>) {
        self.failed.push(StepFailure {
            step,
            error: error.into(),
        });
    }

    pub(crate) fn finish(self) -> RemediationOutcome {
        if self.failed.is_empty() {
            RemediationOutcome::FullSuccess {
                completed: self.completed,
            }
        } else {
            RemediationOutcome::PartialFailure {
                completed: self.completed,
                failed: self.failed,
            }
        }
    }
}

pub(crate) struct Remediator<'a> {
    pub(crate) directory: &'a dyn InstanceDirectory,
    pub(crate) users: &'a dyn UserDirectory,
}

impl Remediator<'_> {
    /// Full force-logout: reconnect first so the gateway accepts the logout.
    pub(crate) async fn force_logout(
        &self,
        instance: &InstanceSummary,
        token: &str,
    ) -> RemediationOutcome {
        let mut saga = Saga::new();
        self.connect(&mut saga, instance, token).await;
        self.logout_and_mark_offline(saga, instance, token).await
    }

    /// Best-effort connect ahead of a logout. A failure is recorded, never fatal.
    pub(crate) async fn connect(&self, saga: &mut Saga, instance: &InstanceSummary, token: &str) -> bool {
        let connected = self
            .directory
            .connect(&instance.name, token)
            .await
            .map(|_| ());
        if let Err(err) = &connected {
            warn!(instance = %instance.name, kind = err.kind().as_str(), "connect before logout failed: {err}");
        }
        saga.record(RemediationStep::Connect, connected)
    }

    pub(crate) async fn logout_and_mark_offline(
        &self,
        mut saga: Saga,
        instance: &InstanceSummary,
        token: &str,
    ) -> RemediationOutcome {
        let logout = self.directory.logout(&instance.name, token).await;
        if let Err(err) = &logout {
            warn!(instance = %instance.name, kind = err.kind().as_str(), "logout failed: {err}");
        }
        if !saga.record(RemediationStep::Logout, logout) {
            saga.fail(RemediationStep::MarkOffline, "skipped: logout failed");
            return saga.finish();
        }
        self.mark_offline(&mut saga, instance).await;
        saga.finish()
    }

    pub(crate) async fn mark_offline(&self, saga: &mut Saga, instance: &InstanceSummary) -> bool {
        let result = match self
            .users
            .set_status_by_instance_id(&instance.id, UserStatus::Offline)
            .await
        {
            Ok(user) => {
                debug!(instance = %instance.name, user = %user.id, "user marked offline");
                Ok(())
            }
            Err(err) => {
                warn!(instance = %instance.name, "could not mark user offline: {err}");
                Err(err)
            }
        };
        saga.record(RemediationStep::MarkOffline, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_without_failures_is_full_success() {
        let mut saga = Saga::new();
        saga.record::<String>(RemediationStep::Connect, Ok(()));
        saga.record::<String>(RemediationStep::Logout, Ok(()));
        assert_eq!(
            saga.finish(),
            RemediationOutcome::FullSuccess {
                completed: vec![RemediationStep::Connect, RemediationStep::Logout]
            }
        );
    }

    #[test]
    fn resumed_saga_keeps_earlier_steps_and_failures() {
        let mut saga = Saga::resume(vec![RemediationStep::Connect]);
        assert!(!saga.record(RemediationStep::Logout, Err("500")));
        let outcome = saga.finish();
        assert!(outcome.step_succeeded(RemediationStep::Connect));
        assert_eq!(outcome.failures()[0].step, RemediationStep::Logout);
        assert_eq!(outcome.failures()[0].error, "500");
    }
}
