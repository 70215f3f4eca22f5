use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use sentinel_core::CheckError;
use sentinel_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sentinel_types::UserLookup;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::Level;

use crate::AppState;

/// Error envelope: `{success: false, message, error, code, timestamp}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.clone(),
            message,
            code: "INVALID_INPUT",
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &err {
            CheckError::NotFound(_) => "not found",
            CheckError::NotOnline { .. } => "instance is not online",
            CheckError::InvalidInput(_) => "invalid request",
            CheckError::Directory(_) => "instance directory unavailable",
            CheckError::UserStore(_) => "user directory error",
        };
        let detail = err.to_string();
        emit_event(
            if status.is_server_error() {
                Level::WARN
            } else {
                Level::DEBUG
            },
            ProcessKind::Server,
            ObservabilityEvent {
                event: "request.failed",
                component: "http",
                status: Some(status.as_str()),
                error_code: Some(err.code()),
                detail: Some(&detail),
                ..ObservabilityEvent::default()
            },
        );
        Self {
            status,
            message: message.to_string(),
            error: detail,
            code: err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "message": self.message,
            "error": self.error,
            "code": self.code,
            "timestamp": Utc::now(),
        });
        (self.status, Json(body)).into_response()
    }
}

fn ok(message: impl Into<String>, data: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": message.into(),
        "data": data,
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize, Default)]
struct LookupQuery {
    instance_id: Option<String>,
    mobile_number: Option<String>,
}

impl LookupQuery {
    fn lookup(&self) -> Result<UserLookup, ApiError> {
        UserLookup::from_parts(self.instance_id.as_deref(), self.mobile_number.as_deref())
            .ok_or_else(|| ApiError::bad_request("instance_id or mobile_number is required"))
    }
}

async fn describe(State(state): State<AppState>) -> Json<Value> {
    let last_pass = state.last_pass().await.map(|outcome| {
        json!({
            "success": outcome.success,
            "message": outcome.message,
            "statistics": outcome.statistics,
            "timestamp": outcome.timestamp,
        })
    });
    ok(
        "CodeChat Sentinel",
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.environment,
            "startedAt": state.started_at,
            "scheduler": {
                "enabled": state.scheduler.enabled,
                "intervalSecs": state.scheduler.interval_secs,
            },
            "delayMs": u64::try_from(state.reconciler.delay().as_millis()).unwrap_or(u64::MAX),
            "busy": state.reconciler.is_busy(),
            "lastPass": last_pass,
            "endpoints": [
                "GET /health",
                "GET /check-instances",
                "GET /check-individual-instance/{id}",
                "POST /logout-all-instances",
                "POST /logout-instance?instance_id=|mobile_number=",
                "GET /api/stats/instance?instance_id=|mobile_number=",
                "GET /api/stats/all-instances",
            ],
        }),
    )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    ok(
        "ok",
        json!({
            "status": "healthy",
            "uptimeSecs": uptime,
            "environment": state.environment,
        }),
    )
}

async fn check_instances(State(state): State<AppState>) -> Response {
    let outcome = state.reconciler.reconcile_all().await;
    state.record_pass(&outcome).await;
    if outcome.success {
        Json(json!({
            "success": true,
            "message": outcome.message,
            "statistics": outcome.statistics,
            "data": outcome.results,
            "timestamp": outcome.timestamp,
        }))
        .into_response()
    } else {
        let body = json!({
            "success": false,
            "message": outcome.message,
            "error": outcome.error,
            "statistics": outcome.statistics,
            "timestamp": outcome.timestamp,
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

async fn check_individual_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let result = state.reconciler.reconcile_one(&id).await?;
    let message = result.message.clone();
    Ok(ok(message, json!(result)))
}

async fn logout_all_instances(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let outcome = state.reconciler.logout_indeterminate().await?;
    let message = format!(
        "{} of {} indeterminate instances logged out",
        outcome.logged_out, outcome.indeterminate
    );
    Ok(ok(message, json!(outcome)))
}

async fn logout_instance(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Value>, ApiError> {
    let lookup = query.lookup()?;
    let result = state.reconciler.logout_user(&lookup).await?;
    emit_event(
        Level::INFO,
        ProcessKind::Server,
        ObservabilityEvent {
            event: "instance.logout",
            component: "http",
            instance: Some(&result.instance_name),
            status: Some(if result.status_updated { "offline" } else { "status_not_updated" }),
            ..ObservabilityEvent::default()
        },
    );
    let message = format!("instance {} logged out", result.instance_name);
    Ok(ok(message, json!(result)))
}

async fn instance_stats(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Value>, ApiError> {
    let lookup = query.lookup()?;
    let stats = state.reconciler.instance_stats(&lookup).await?;
    Ok(ok("instance stats", json!(stats)))
}

async fn all_instance_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.reconciler.all_instance_stats().await?;
    let message = format!("{} instances cross-referenced", stats.total_instances);
    Ok(ok(message, json!(stats)))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(describe))
        .route("/health", get(health))
        .route("/check-instances", get(check_instances))
        .route("/check-individual-instance/{id}", get(check_individual_instance))
        .route("/logout-all-instances", post(logout_all_instances))
        .route("/logout-instance", post(logout_instance))
        .route("/api/stats/instance", get(instance_stats))
        .route("/api/stats/all-instances", get(all_instance_stats))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let scheduler = if state.scheduler.enabled {
        Some(tokio::spawn(crate::run_reconcile_scheduler(state.clone())))
    } else {
        tracing::info!("reconciliation scheduler disabled");
        None
    };
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?.to_string();
    emit_event(
        Level::INFO,
        ProcessKind::Server,
        ObservabilityEvent {
            event: "server.listening",
            component: "http",
            detail: Some(&bound),
            ..ObservabilityEvent::default()
        },
    );
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;
    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    result?;
    Ok(())
}
