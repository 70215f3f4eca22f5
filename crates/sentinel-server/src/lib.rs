use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinel_core::{Reconciler, SchedulerSettings};
use sentinel_notify::{Alert, Notifier};
use sentinel_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sentinel_types::ReconciliationOutcome;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::Level;

mod http;

pub use http::{app_router, serve, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub notifier: Notifier,
    pub environment: String,
    pub scheduler: SchedulerSettings,
    pub started_at: DateTime<Utc>,
    last_pass: Arc<RwLock<Option<ReconciliationOutcome>>>,
}

impl AppState {
    pub fn new(
        reconciler: Arc<Reconciler>,
        notifier: Notifier,
        environment: impl Into<String>,
        scheduler: SchedulerSettings,
    ) -> Self {
        Self {
            reconciler,
            notifier,
            environment: environment.into(),
            scheduler,
            started_at: Utc::now(),
            last_pass: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn last_pass(&self) -> Option<ReconciliationOutcome> {
        self.last_pass.read().await.clone()
    }

    /// Remember the outcome and alert when the pass as a whole failed.
    pub async fn record_pass(&self, outcome: &ReconciliationOutcome) {
        if !outcome.success {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| outcome.message.clone());
            self.notifier
                .notify(&Alert::ReconciliationFailed { error })
                .await;
        }
        *self.last_pass.write().await = Some(outcome.clone());
    }
}

/// One scheduler tick. Returns `false` when a pass was already in flight.
pub async fn run_scheduled_pass(state: &AppState) -> bool {
    let Some(outcome) = state.reconciler.try_reconcile_all().await else {
        tracing::info!("scheduled reconciliation skipped, previous pass still running");
        return false;
    };
    emit_event(
        if outcome.success {
            Level::INFO
        } else {
            Level::WARN
        },
        ProcessKind::Server,
        ObservabilityEvent {
            event: "reconcile.scheduled.finished",
            component: "scheduler",
            status: Some(if outcome.success { "ok" } else { "failed" }),
            detail: Some(&outcome.message),
            ..ObservabilityEvent::default()
        },
    );
    state.record_pass(&outcome).await;
    true
}

pub async fn run_reconcile_scheduler(state: AppState) {
    let period = Duration::from_secs(state.scheduler.interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if !state.scheduler.run_on_start {
        // The first tick of an interval completes immediately.
        ticker.tick().await;
    }
    tracing::info!("reconciliation scheduler running every {:?}", period);
    loop {
        ticker.tick().await;
        run_scheduled_pass(&state).await;
    }
}
