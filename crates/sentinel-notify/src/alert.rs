use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            AlertLevel::Info => "[OK]",
            AlertLevel::Warning => "[WARN]",
            AlertLevel::Critical => "[CRITICAL]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    ServiceDown {
        target: String,
        consecutive_failures: u32,
        detail: String,
    },
    AttemptingRecovery {
        target: String,
    },
    RecoveryTriggerFailed {
        target: String,
        error: String,
    },
    RecoverySucceeded {
        target: String,
    },
    RecoveryFailed {
        target: String,
        detail: String,
    },
    ManualInterventionRequired {
        target: String,
        consecutive_failures: u32,
    },
    ServiceRecovered {
        target: String,
        after_failures: u32,
    },
    ReconciliationFailed {
        error: String,
    },
}

impl Alert {
    pub fn level(&self) -> AlertLevel {
        match self {
            Alert::RecoverySucceeded { .. } | Alert::ServiceRecovered { .. } => AlertLevel::Info,
            Alert::ServiceDown { .. }
            | Alert::AttemptingRecovery { .. }
            | Alert::ReconciliationFailed { .. } => AlertLevel::Warning,
            Alert::RecoveryTriggerFailed { .. }
            | Alert::RecoveryFailed { .. }
            | Alert::ManualInterventionRequired { .. } => AlertLevel::Critical,
        }
    }

    /// Stable event name used in webhook payloads and logs.
    pub fn event(&self) -> &'static str {
        match self {
            Alert::ServiceDown { .. } => "service_down",
            Alert::AttemptingRecovery { .. } => "attempting_recovery",
            Alert::RecoveryTriggerFailed { .. } => "recovery_trigger_failed",
            Alert::RecoverySucceeded { .. } => "recovery_succeeded",
            Alert::RecoveryFailed { .. } => "recovery_failed",
            Alert::ManualInterventionRequired { .. } => "manual_intervention_required",
            Alert::ServiceRecovered { .. } => "service_recovered",
            Alert::ReconciliationFailed { .. } => "reconciliation_failed",
        }
    }

    fn body(&self) -> String {
        match self {
            Alert::ServiceDown {
                target,
                consecutive_failures,
                detail,
            } => format!(
                "Service unreachable: {target}\nConsecutive failures: {consecutive_failures}\nDetail: {detail}"
            ),
            Alert::AttemptingRecovery { target } => {
                format!("Attempting automatic recovery for {target} (re-login and restart).")
            }
            Alert::RecoveryTriggerFailed { target, error } => {
                format!("Automatic recovery for {target} could not be started: {error}")
            }
            Alert::RecoverySucceeded { target } => {
                format!("Automatic recovery succeeded, {target} is answering again.")
            }
            Alert::RecoveryFailed { target, detail } => format!(
                "Automatic recovery did not bring {target} back: {detail}\nManual check needed."
            ),
            Alert::ManualInterventionRequired {
                target,
                consecutive_failures,
            } => format!(
                "Manual intervention required: {target} still down after {consecutive_failures} consecutive checks and one recovery attempt."
            ),
            Alert::ServiceRecovered {
                target,
                after_failures,
            } => format!("{target} is healthy again after {after_failures} failed checks."),
            Alert::ReconciliationFailed { error } => {
                format!("Instance reconciliation pass failed: {error}")
            }
        }
    }

    /// Human-readable text sent to the sink.
    pub fn render(&self, environment: &str) -> String {
        format!(
            "{} CodeChat Sentinel ({environment})\n{}",
            self.level().marker(),
            self.body()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_level_environment_and_detail() {
        let alert = Alert::ServiceDown {
            target: "https://api.example.com/health".to_string(),
            consecutive_failures: 1,
            detail: "status 502".to_string(),
        };
        let text = alert.render("production");
        assert!(text.starts_with("[WARN] CodeChat Sentinel (production)"));
        assert!(text.contains("status 502"));
        assert_eq!(alert.event(), "service_down");
    }

    #[test]
    fn escalation_alerts_are_critical() {
        let alert = Alert::ManualInterventionRequired {
            target: "t".to_string(),
            consecutive_failures: 4,
        };
        assert_eq!(alert.level(), AlertLevel::Critical);
        assert!(alert.render("dev").contains("after 4 consecutive checks"));
        assert_eq!(
            Alert::ServiceRecovered {
                target: "t".to_string(),
                after_failures: 2
            }
            .level(),
            AlertLevel::Info
        );
    }
}
