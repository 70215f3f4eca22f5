use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sentinel_notify::Notifier;
use sentinel_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use crate::machine::{Effect, WatchdogMachine, WatchdogPhase, WatchdogPolicy, WatchdogState};
use crate::probe::HealthProbe;
use crate::trigger::RecoveryTrigger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub healthy: bool,
    pub phase: WatchdogPhase,
    /// Set when a recovery was triggered and a confirmation poll is due.
    pub confirmation: Option<Duration>,
}

const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(15);

/// Executes the machine's effects against real collaborators. The machine
/// lock is never held across an await.
///
/// Alerts are delivered inline so they keep their order, but each delivery
/// is cut off after `alert_timeout`; a hung webhook delays a poll by at most
/// that long.
pub struct WatchdogRunner {
    machine: Mutex<WatchdogMachine>,
    probe: Arc<dyn HealthProbe>,
    trigger: Arc<dyn RecoveryTrigger>,
    notifier: Notifier,
    interval: Duration,
    alert_timeout: Duration,
}

impl WatchdogRunner {
    pub fn new(
        policy: WatchdogPolicy,
        interval: Duration,
        probe: Arc<dyn HealthProbe>,
        trigger: Arc<dyn RecoveryTrigger>,
        notifier: Notifier,
    ) -> Self {
        Self {
            machine: Mutex::new(WatchdogMachine::new(policy)),
            probe,
            trigger,
            notifier,
            interval,
            alert_timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }

    pub fn with_alert_timeout(mut self, alert_timeout: Duration) -> Self {
        self.alert_timeout = alert_timeout;
        self
    }

    pub fn state(&self) -> WatchdogState {
        self.machine.lock().state().clone()
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.machine.lock().phase()
    }

    pub async fn poll_once(&self) -> PollReport {
        let probe = self.probe.check().await;
        let effects = self
            .machine
            .lock()
            .on_poll(probe.healthy, &probe.detail, Instant::now());
        let confirmation = self.execute(effects).await;
        let phase = self.phase();
        emit_event(
            if probe.healthy { Level::DEBUG } else { Level::WARN },
            ProcessKind::Watchdog,
            ObservabilityEvent {
                event: "watchdog.poll",
                component: "watchdog",
                status: Some(phase.as_str()),
                detail: Some(&probe.detail),
                ..ObservabilityEvent::default()
            },
        );
        PollReport {
            healthy: probe.healthy,
            phase,
            confirmation,
        }
    }

    /// The one-shot poll after a triggered recovery.
    pub async fn confirm_recovery(&self) -> bool {
        let probe = self.probe.check().await;
        let effects = self
            .machine
            .lock()
            .on_confirmation(probe.healthy, &probe.detail);
        self.execute(effects).await;
        info!(healthy = probe.healthy, "recovery confirmation: {}", probe.detail);
        probe.healthy
    }

    async fn execute(&self, effects: Vec<Effect>) -> Option<Duration> {
        let mut pending = VecDeque::from(effects);
        let mut confirmation = None;
        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Notify(alert) => {
                    let delivery = self.notifier.notify(&alert);
                    if tokio::time::timeout(self.alert_timeout, delivery).await.is_err() {
                        warn!(
                            event = alert.event(),
                            "alert delivery exceeded {:?}, continuing",
                            self.alert_timeout
                        );
                    }
                }
                Effect::TriggerRecovery => {
                    info!(trigger = self.trigger.name(), "triggering recovery");
                    let result = self.trigger.trigger().await.map_err(|err| format!("{err:#}"));
                    if let Err(err) = &result {
                        warn!(trigger = self.trigger.name(), "recovery trigger failed: {err}");
                        emit_event(
                            Level::ERROR,
                            ProcessKind::Watchdog,
                            ObservabilityEvent {
                                event: "watchdog.recovery_trigger",
                                component: self.trigger.name(),
                                status: Some("failed"),
                                error_code: Some("RECOVERY_TRIGGER_FAILED"),
                                detail: Some(err.as_str()),
                                ..ObservabilityEvent::default()
                            },
                        );
                    }
                    let follow = self.machine.lock().on_trigger_result(result);
                    pending.extend(follow);
                }
                Effect::ScheduleConfirmation(wait) => confirmation = Some(wait),
            }
        }
        confirmation
    }

    /// Poll on the interval until cancelled. Each triggered recovery gets its
    /// own confirmation task sharing the same token.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        emit_event(
            Level::INFO,
            ProcessKind::Watchdog,
            ObservabilityEvent {
                event: "watchdog.start",
                component: "watchdog",
                ..ObservabilityEvent::default()
            },
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("watchdog stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    if let Some(wait) = report.confirmation {
                        self.spawn_confirmation(wait, cancel.clone());
                    }
                }
            }
        }
    }

    fn spawn_confirmation(self: &Arc<Self>, wait: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        info!("recovery confirmation scheduled in {wait:?}");
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(wait) => {
                    runner.confirm_recovery().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeResult;
    use async_trait::async_trait;
    use sentinel_notify::{NotificationSink, OutboundMessage, RecordingSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let healthy = self.answers.lock().pop_front().unwrap_or(false);
            ProbeResult {
                healthy,
                detail: if healthy { "status 200" } else { "status 503" }.to_string(),
            }
        }
    }

    #[derive(Default)]
    struct CountingTrigger {
        calls: AtomicUsize,
        fail: bool,
        takes: Duration,
    }

    #[async_trait]
    impl RecoveryTrigger for CountingTrigger {
        fn name(&self) -> &str {
            "counting"
        }

        async fn trigger(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.takes.is_zero() {
                tokio::time::sleep(self.takes).await;
            }
            if self.fail {
                anyhow::bail!("automation offline");
            }
            Ok(())
        }
    }

    fn runner(
        answers: &[bool],
        trigger: Arc<CountingTrigger>,
        sink: Arc<RecordingSink>,
    ) -> WatchdogRunner {
        let mut policy = WatchdogPolicy::new("https://svc/health");
        policy.confirmation_wait = Duration::from_millis(10);
        WatchdogRunner::new(
            policy,
            Duration::from_millis(10),
            Arc::new(ScriptedProbe::new(answers)),
            trigger,
            Notifier::new(vec![sink], "test", None),
        )
    }

    /// Sink that never finishes a delivery.
    struct HangingSink;

    #[async_trait]
    impl NotificationSink for HangingSink {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn send(&self, _message: &OutboundMessage) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_restart_then_escalation_on_every_later_failure() {
        let trigger = Arc::new(CountingTrigger::default());
        let sink = Arc::new(RecordingSink::new());
        // poll, poll, confirmation, poll, poll
        let runner = runner(&[false, false, false, false, false], trigger.clone(), sink.clone());

        let first = runner.poll_once().await;
        assert_eq!(first.confirmation, Some(Duration::from_millis(10)));
        assert_eq!(first.phase, WatchdogPhase::Recovering);
        runner.poll_once().await;
        assert!(!runner.confirm_recovery().await);
        let third = runner.poll_once().await;
        assert_eq!(third.phase, WatchdogPhase::Escalated);
        runner.poll_once().await;

        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.events(),
            vec![
                "service_down",
                "attempting_recovery",
                "recovery_failed",
                "manual_intervention_required",
                "manual_intervention_required",
            ]
        );
        assert_eq!(runner.state().consecutive_failures, 4);
    }

    #[tokio::test]
    async fn failed_trigger_alerts_without_confirmation() {
        let trigger = Arc::new(CountingTrigger {
            fail: true,
            ..CountingTrigger::default()
        });
        let sink = Arc::new(RecordingSink::new());
        let runner = runner(&[false], trigger.clone(), sink.clone());
        let report = runner.poll_once().await;
        assert!(report.confirmation.is_none());
        assert_eq!(
            sink.events(),
            vec!["service_down", "attempting_recovery", "recovery_trigger_failed"]
        );
        assert!(runner.state().last_restart_time.is_some());
    }

    #[tokio::test]
    async fn run_loop_confirms_recovery_and_stops_on_cancel() {
        let trigger = Arc::new(CountingTrigger::default());
        let sink = Arc::new(RecordingSink::new());
        // first poll fails, then everything is healthy
        let mut answers = vec![false];
        answers.extend(std::iter::repeat(true).take(200));
        let runner = Arc::new(runner(&answers, trigger.clone(), sink.clone()));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        handle.await.expect("join");

        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
        let events = sink.events();
        assert_eq!(&events[..2], &["service_down", "attempting_recovery"]);
        assert!(events.contains(&"service_recovered") || events.contains(&"recovery_succeeded"));
        assert_eq!(runner.phase(), WatchdogPhase::Healthy);
    }

    #[tokio::test]
    async fn cooldown_starts_when_the_trigger_is_invoked() {
        let trigger = Arc::new(CountingTrigger {
            takes: Duration::from_millis(300),
            ..CountingTrigger::default()
        });
        let sink = Arc::new(RecordingSink::new());
        let runner = runner(&[false], trigger.clone(), sink);

        let started = Instant::now();
        runner.poll_once().await;
        let restarted_at = runner.state().last_restart_time.expect("restart recorded");
        assert!(
            restarted_at.saturating_duration_since(started) < Duration::from_millis(100),
            "{:?}",
            restarted_at.saturating_duration_since(started)
        );
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_a_pending_confirmation() {
        let trigger = Arc::new(CountingTrigger::default());
        let sink = Arc::new(RecordingSink::new());
        let probe = Arc::new(ScriptedProbe::new(&[false, true, true]));
        let mut policy = WatchdogPolicy::new("https://svc/health");
        policy.confirmation_wait = Duration::from_millis(200);
        let runner = Arc::new(WatchdogRunner::new(
            policy,
            Duration::from_secs(3600),
            probe.clone(),
            trigger.clone(),
            Notifier::new(vec![sink.clone()], "test", None),
        ));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.phase(), WatchdogPhase::Recovering);
        cancel.cancel();
        handle.await.expect("join");

        // well past the confirmation wait
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.events(), vec!["service_down", "attempting_recovery"]);
        assert!(runner.state().confirmation_pending);
    }

    #[tokio::test]
    async fn hung_alert_delivery_does_not_stall_the_poll() {
        let trigger = Arc::new(CountingTrigger::default());
        let mut policy = WatchdogPolicy::new("https://svc/health");
        policy.confirmation_wait = Duration::from_millis(10);
        let runner = WatchdogRunner::new(
            policy,
            Duration::from_millis(10),
            Arc::new(ScriptedProbe::new(&[false])),
            trigger.clone(),
            Notifier::new(vec![Arc::new(HangingSink)], "test", None),
        )
        .with_alert_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let report = tokio::time::timeout(Duration::from_secs(2), runner.poll_once())
            .await
            .expect("poll finished");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.phase, WatchdogPhase::Recovering);
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    }
}
