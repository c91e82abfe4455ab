//! Status API route handlers.
//!
//! All endpoints return JSON. Cycle state is read from the latest
//! published snapshot; everything else comes straight from the ledger.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::engine::orchestrator::CycleSnapshot;
use crate::storage::stats::StatsOverview;
use crate::storage::Ledger;
use crate::types::{ManualPosition, NewManualPosition, Position};

/// Most rows any list endpoint returns.
const LIST_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub ledger: Ledger,
    pub snapshots: watch::Receiver<Arc<CycleSnapshot>>,
    pub scan_now: Arc<Notify>,
}

impl DashboardState {
    pub fn new(
        ledger: Ledger,
        snapshots: watch::Receiver<Arc<CycleSnapshot>>,
        scan_now: Arc<Notify>,
    ) -> Self {
        Self {
            ledger,
            snapshots,
            scan_now,
        }
    }
}

pub type AppState = Arc<DashboardState>;

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    warn!(error = %format!("{e:#}"), "Status API request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PositionsResponse {
    pub open: Vec<Position>,
    pub recent: Vec<Position>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseRequest {
    /// Exit price in cents.
    pub exit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanAccepted {
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<CycleSnapshot> {
    let snapshot = state.snapshots.borrow().clone();
    Json(snapshot.as_ref().clone())
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> ApiResult<Json<PositionsResponse>> {
    let open = state.ledger.open_positions().await.map_err(internal)?;
    let recent = state.ledger.positions(LIST_LIMIT).await.map_err(internal)?;
    Ok(Json(PositionsResponse { open, recent }))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsOverview>> {
    let stats = state.ledger.stats_overview().await.map_err(internal)?;
    Ok(Json(stats))
}

/// POST /api/scan-now
pub async fn scan_now(State(state): State<AppState>) -> (StatusCode, Json<ScanAccepted>) {
    state.scan_now.notify_one();
    info!("Scan requested via status API");
    (StatusCode::ACCEPTED, Json(ScanAccepted { status: "scan requested" }))
}

/// GET /api/manual-positions
pub async fn list_manual_positions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ManualPosition>>> {
    let positions = state.ledger.manual_positions(LIST_LIMIT).await.map_err(internal)?;
    Ok(Json(positions))
}

/// POST /api/manual-positions
pub async fn add_manual_position(
    State(state): State<AppState>,
    Json(req): Json<NewManualPosition>,
) -> ApiResult<(StatusCode, Json<ManualPosition>)> {
    if !(req.entry_price > 0.0 && req.entry_price < 100.0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "entry_price must be between 0 and 100 cents".to_string(),
        ));
    }
    if req.quantity == 0 {
        return Err((StatusCode::BAD_REQUEST, "quantity must be at least 1".to_string()));
    }
    if req.player_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "player_name is required".to_string()));
    }

    let position = state.ledger.add_manual_position(&req).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(position)))
}

/// POST /api/manual-positions/:id/close
pub async fn close_manual_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CloseRequest>,
) -> ApiResult<Json<ManualPosition>> {
    if !(0.0..=100.0).contains(&req.exit_price) {
        return Err((
            StatusCode::BAD_REQUEST,
            "exit_price must be between 0 and 100 cents".to_string(),
        ));
    }

    let closed = state
        .ledger
        .close_manual_position(id, req.exit_price)
        .await
        .map_err(internal)?;
    if !closed {
        return Err((
            StatusCode::NOT_FOUND,
            format!("No open manual position with id {id}"),
        ));
    }

    match state.ledger.manual_position(id).await.map_err(internal)? {
        Some(position) => Ok(Json(position)),
        None => Err((StatusCode::NOT_FOUND, format!("No manual position with id {id}"))),
    }
}
