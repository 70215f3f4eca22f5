//! Pure watchdog state machine. No I/O: every input carries the current time
//! and every transition returns the side effects the runner must perform.

use std::time::Duration;

use sentinel_notify::Alert;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    Healthy,
    Failing(u32),
    /// Recovery triggered, waiting for the confirmation poll.
    Recovering,
    /// A restart was tried and the target is still down.
    Escalated,
}

impl WatchdogPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchdogPhase::Healthy => "healthy",
            WatchdogPhase::Failing(_) => "failing",
            WatchdogPhase::Recovering => "recovering",
            WatchdogPhase::Escalated => "escalated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogPolicy {
    /// Shown in alerts.
    pub target: String,
    pub cooldown: Duration,
    pub confirmation_wait: Duration,
    pub escalation_threshold: u32,
}

impl WatchdogPolicy {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cooldown: Duration::from_secs(30 * 60),
            confirmation_wait: Duration::from_secs(120),
            escalation_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify(Alert),
    TriggerRecovery,
    ScheduleConfirmation(Duration),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchdogState {
    pub last_status: HealthStatus,
    /// Reset by a healthy regular poll or a successful confirmation.
    pub consecutive_failures: u32,
    pub restart_attempted: bool,
    pub last_restart_time: Option<Instant>,
    pub confirmation_pending: bool,
}

#[derive(Debug)]
pub struct WatchdogMachine {
    policy: WatchdogPolicy,
    state: WatchdogState,
}

impl WatchdogMachine {
    pub fn new(policy: WatchdogPolicy) -> Self {
        Self {
            policy,
            state: WatchdogState::default(),
        }
    }

    pub fn policy(&self) -> &WatchdogPolicy {
        &self.policy
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    pub fn phase(&self) -> WatchdogPhase {
        let state = &self.state;
        if state.confirmation_pending {
            return WatchdogPhase::Recovering;
        }
        match state.consecutive_failures {
            0 => WatchdogPhase::Healthy,
            n if state.restart_attempted && n >= self.policy.escalation_threshold => {
                WatchdogPhase::Escalated
            }
            n => WatchdogPhase::Failing(n),
        }
    }

    /// Never restarted, or the last restart is older than the cooldown.
    pub fn restart_permitted(&self, now: Instant) -> bool {
        match self.state.last_restart_time {
            None => true,
            Some(at) => now.saturating_duration_since(at) > self.policy.cooldown,
        }
    }

    /// Regular interval poll.
    pub fn on_poll(&mut self, healthy: bool, detail: &str, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if healthy {
            if self.state.consecutive_failures > 0 {
                effects.push(Effect::Notify(Alert::ServiceRecovered {
                    target: self.policy.target.clone(),
                    after_failures: self.state.consecutive_failures,
                }));
            }
            self.state.consecutive_failures = 0;
            self.state.restart_attempted = false;
            self.state.last_status = HealthStatus::Healthy;
            // A later confirmation poll has nothing left to confirm.
            self.state.confirmation_pending = false;
            return effects;
        }

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.last_status = HealthStatus::Unhealthy;
        let failures = self.state.consecutive_failures;
        if failures == 1 {
            effects.push(Effect::Notify(Alert::ServiceDown {
                target: self.policy.target.clone(),
                consecutive_failures: failures,
                detail: detail.to_string(),
            }));
        }

        if self.state.restart_attempted && self.restart_permitted(now) {
            self.state.restart_attempted = false;
        }

        let restart = !self.state.restart_attempted
            && !self.state.confirmation_pending
            && self.restart_permitted(now);
        if restart {
            self.state.restart_attempted = true;
            // The cooldown runs from the invocation, not from the trigger's return.
            self.state.last_restart_time = Some(now);
            effects.push(Effect::Notify(Alert::AttemptingRecovery {
                target: self.policy.target.clone(),
            }));
            effects.push(Effect::TriggerRecovery);
        } else if failures >= self.policy.escalation_threshold {
            effects.push(Effect::Notify(Alert::ManualInterventionRequired {
                target: self.policy.target.clone(),
                consecutive_failures: failures,
            }));
        }
        effects
    }

    /// Result of the recovery trigger issued for `TriggerRecovery`. The
    /// cooldown already started when the trigger was issued.
    pub fn on_trigger_result(&mut self, result: Result<(), String>) -> Vec<Effect> {
        match result {
            Ok(()) => {
                self.state.confirmation_pending = true;
                vec![Effect::ScheduleConfirmation(self.policy.confirmation_wait)]
            }
            Err(error) => vec![Effect::Notify(Alert::RecoveryTriggerFailed {
                target: self.policy.target.clone(),
                error,
            })],
        }
    }

    /// One-shot poll after a triggered recovery. Stale confirmations are ignored.
    pub fn on_confirmation(&mut self, healthy: bool, detail: &str) -> Vec<Effect> {
        if !self.state.confirmation_pending {
            return Vec::new();
        }
        self.state.confirmation_pending = false;
        if healthy {
            self.state.consecutive_failures = 0;
            self.state.last_status = HealthStatus::Healthy;
            vec![Effect::Notify(Alert::RecoverySucceeded {
                target: self.policy.target.clone(),
            })]
        } else {
            self.state.last_status = HealthStatus::Unhealthy;
            vec![Effect::Notify(Alert::RecoveryFailed {
                target: self.policy.target.clone(),
                detail: detail.to_string(),
            })]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> WatchdogMachine {
        WatchdogMachine::new(WatchdogPolicy::new("https://svc/health"))
    }

    fn events(effects: &[Effect]) -> Vec<&'static str> {
        effects
            .iter()
            .map(|e| match e {
                Effect::Notify(alert) => alert.event(),
                Effect::TriggerRecovery => "trigger",
                Effect::ScheduleConfirmation(_) => "schedule_confirmation",
            })
            .collect()
    }

    #[test]
    fn first_failure_alerts_and_triggers_recovery() {
        let mut m = machine();
        let now = Instant::now();
        let effects = m.on_poll(false, "status 502", now);
        assert_eq!(
            events(&effects),
            vec!["service_down", "attempting_recovery", "trigger"]
        );
        assert!(m.state().restart_attempted);
        assert_eq!(m.state().last_restart_time, Some(now));
        assert_eq!(m.phase(), WatchdogPhase::Failing(1));

        let follow = m.on_trigger_result(Ok(()));
        assert_eq!(
            follow,
            vec![Effect::ScheduleConfirmation(Duration::from_secs(120))]
        );
        assert_eq!(m.phase(), WatchdogPhase::Recovering);
        assert_eq!(m.state().last_restart_time, Some(now));
    }

    #[test]
    fn failed_confirmation_escalates_on_third_and_later_polls_without_second_restart() {
        let mut m = machine();
        let start = Instant::now();
        let mut triggers = 0;
        let mut escalations = Vec::new();

        for poll in 1..=5u32 {
            let now = start + Duration::from_secs(60 * u64::from(poll));
            let effects = m.on_poll(false, "timeout", now);
            for effect in &effects {
                match effect {
                    Effect::TriggerRecovery => {
                        triggers += 1;
                        m.on_trigger_result(Ok(()));
                    }
                    Effect::Notify(Alert::ManualInterventionRequired { .. }) => {
                        escalations.push(poll)
                    }
                    _ => {}
                }
            }
            if poll == 2 {
                let confirmation = m.on_confirmation(false, "still down");
                assert_eq!(events(&confirmation), vec!["recovery_failed"]);
            }
        }

        assert_eq!(triggers, 1);
        assert_eq!(escalations, vec![3, 4, 5]);
        assert_eq!(m.phase(), WatchdogPhase::Escalated);
    }

    #[test]
    fn expired_cooldown_reopens_the_restart_gate() {
        let mut m = machine();
        let start = Instant::now();
        m.on_poll(false, "down", start);
        m.on_trigger_result(Err("automation unreachable".to_string()));

        let within = m.on_poll(false, "down", start + Duration::from_secs(600));
        assert!(!within.contains(&Effect::TriggerRecovery));

        let after = m.on_poll(false, "down", start + Duration::from_secs(1801));
        assert!(after.contains(&Effect::TriggerRecovery));
        assert!(!events(&after).contains(&"manual_intervention_required"));
    }

    #[test]
    fn trigger_failure_keeps_restart_time_and_alerts() {
        let mut m = machine();
        let now = Instant::now();
        m.on_poll(false, "down", now);
        let effects = m.on_trigger_result(Err("exit status 1".to_string()));
        assert_eq!(events(&effects), vec!["recovery_trigger_failed"]);
        assert_eq!(m.state().last_restart_time, Some(now));
        assert!(!m.state().confirmation_pending);
        assert!(!m.restart_permitted(now + Duration::from_secs(5)));
    }

    #[test]
    fn successful_confirmation_resets_failures() {
        let mut m = machine();
        let now = Instant::now();
        m.on_poll(false, "down", now);
        m.on_trigger_result(Ok(()));
        let effects = m.on_confirmation(true, "status 200");
        assert_eq!(events(&effects), vec!["recovery_succeeded"]);
        assert_eq!(m.state().consecutive_failures, 0);
        assert_eq!(m.state().last_status, HealthStatus::Healthy);
        assert_eq!(m.phase(), WatchdogPhase::Healthy);
    }

    #[test]
    fn healthy_poll_after_failures_notifies_once_and_resets() {
        let mut m = machine();
        let now = Instant::now();
        m.on_poll(false, "down", now);
        m.on_trigger_result(Err("nope".to_string()));
        m.on_poll(false, "down", now + Duration::from_secs(60));

        let effects = m.on_poll(true, "status 200", now + Duration::from_secs(120));
        assert_eq!(
            effects,
            vec![Effect::Notify(Alert::ServiceRecovered {
                target: "https://svc/health".to_string(),
                after_failures: 2,
            })]
        );
        assert!(!m.state().restart_attempted);
        assert!(m.on_poll(true, "status 200", now + Duration::from_secs(180)).is_empty());
    }

    #[test]
    fn confirmation_after_regular_recovery_is_stale() {
        let mut m = machine();
        let now = Instant::now();
        m.on_poll(false, "down", now);
        m.on_trigger_result(Ok(()));
        m.on_poll(true, "ok", now + Duration::from_secs(60));
        assert!(m.on_confirmation(true, "ok").is_empty());
    }

    #[test]
    fn failures_within_cooldown_after_a_reset_still_escalate() {
        let mut m = machine();
        let start = Instant::now();
        m.on_poll(false, "down", start);
        m.on_trigger_result(Ok(()));
        m.on_poll(true, "ok", start + Duration::from_secs(60));

        let polls: Vec<Vec<Effect>> = (2..=4u64)
            .map(|i| m.on_poll(false, "down", start + Duration::from_secs(60 * i)))
            .collect();
        assert!(polls.iter().all(|p| !p.contains(&Effect::TriggerRecovery)));
        assert!(events(&polls[2]).contains(&"manual_intervention_required"));
    }
}
