//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::error;

use crate::settlement::{SettlementEngine, SettlementResult};
use crate::wager::{IntakeOutcome, Side, Wager, WagerEvent};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Whether startup recovery has completed.
    pub ready: Arc<AtomicBool>,
    /// The settlement engine.
    pub engine: Arc<SettlementEngine>,
    /// Prometheus render handle, when the recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
    /// Whether payouts are simulated.
    pub dry_run: bool,
}

impl AppState {
    /// Create new app state.
    pub fn new(engine: Arc<SettlementEngine>, dry_run: bool) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            engine,
            prometheus: None,
            dry_run,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether recovery has completed.
    pub ready: bool,
    /// Last settled round.
    pub last_resolved_round: u64,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Payout mode.
    pub mode: &'static str,
    /// Last settled round.
    pub last_resolved_round: u64,
    /// Wager feed cursor.
    pub last_wager_cursor: i64,
    /// Number of open wagers.
    pub open_wagers: usize,
    /// Open stake on side A.
    pub open_stake_a: u64,
    /// Open stake on side B.
    pub open_stake_b: u64,
    /// House fee rate.
    pub fee_rate: String,
    /// Amount decoder in use.
    pub amount_source: String,
    /// Most recent settlement.
    pub last_settlement: Option<SettlementResult>,
}

/// Wager submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// `accepted`, `duplicate` or `rejected`.
    pub outcome: &'static str,
    /// Wager id, when known.
    pub id: Option<String>,
    /// Rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 once recovery is done, 503 before.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        last_resolved_round: state.engine.last_resolved_round().await,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns cursors and open stake.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot().await;

    Json(StatusResponse {
        status: if state.is_ready() { "running" } else { "recovering" },
        mode: if state.dry_run { "dry_run" } else { "live" },
        last_resolved_round: snapshot.last_resolved_round,
        last_wager_cursor: snapshot.last_wager_cursor,
        open_wagers: snapshot.open_wagers.len(),
        open_stake_a: snapshot.open_stake(Side::A),
        open_stake_b: snapshot.open_stake(Side::B),
        fee_rate: state.engine.fee_rate().to_string(),
        amount_source: state.engine.decoder_name().to_string(),
        last_settlement: snapshot.last_settlement,
    })
}

/// List open wagers, oldest first.
pub async fn list_wagers(State(state): State<AppState>) -> impl IntoResponse {
    let mut wagers: Vec<Wager> = state.engine.snapshot().await.open_wagers.into_values().collect();
    wagers.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then_with(|| a.id.cmp(&b.id)));
    Json(wagers)
}

/// Submit a wager event directly to intake.
pub async fn submit_wager(
    State(state): State<AppState>,
    Json(event): Json<WagerEvent>,
) -> impl IntoResponse {
    match state.engine.record_wager(&event).await {
        Ok(IntakeOutcome::Accepted(wager)) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                outcome: "accepted",
                id: Some(wager.id),
                reason: None,
            }),
        ),
        Ok(IntakeOutcome::Duplicate { id }) => (
            StatusCode::OK,
            Json(SubmitResponse {
                outcome: "duplicate",
                id: Some(id),
                reason: None,
            }),
        ),
        Ok(IntakeOutcome::Rejected(reason)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SubmitResponse {
                outcome: "rejected",
                id: event.id,
                reason: Some(reason.to_string()),
            }),
        ),
        Err(e) => {
            error!(error = %e, "Wager submission not persisted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitResponse {
                    outcome: "error",
                    id: event.id,
                    reason: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Recently settled rounds, newest first.
pub async fn rounds(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.history().await)
}

/// Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}
