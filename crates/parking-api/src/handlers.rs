//! API request handlers

use crate::error::ApiError;
use crate::state::AppState;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use parking_core::{LotId, OccupancyReport, Spot};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub api: String,
    pub store: String,
    pub store_up: bool,
    pub lots_registered: usize,
    pub lots_monitored: usize,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub uptime_secs: i64,
}

/// Lot registration body; `rstp_url` keeps the field name existing clients send
#[derive(Debug, Deserialize)]
pub struct AddParkingLotRequest {
    pub id: String,
    pub rstp_url: String,
}

#[derive(Serialize)]
pub struct ParkingLotResponse {
    pub parking_lot_id: String,
    pub image_url: String,
    pub occupancy: Value,
}

// ============================================================================
// HEALTH & STATUS HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// System status overview
pub async fn system_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let store_up = state.check_store().await;
    let lots = state.supervisor.list_lots().await?;
    let stats = state.supervisor.stats();

    Ok(Json(StatusResponse {
        api: "running".into(),
        store: state.supervisor.repository().store().backend().into(),
        store_up,
        lots_registered: lots.len(),
        lots_monitored: state.supervisor.task_count(),
        cycles_completed: stats.cycles_completed,
        cycles_failed: stats.cycles_failed,
        uptime_secs: state.uptime_secs(),
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.metrics.set_lots_monitored(state.supervisor.task_count() as i64);
    let body = state.metrics.export()?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

// ============================================================================
// PARKING LOT HANDLERS
// ============================================================================

/// Register a lot and start monitoring it
pub async fn add_parking_lot(
    State(state): State<AppState>,
    Json(req): Json<AddParkingLotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(lot_id = %req.id, source = %req.rstp_url, "Registering parking lot");

    let lot = state
        .supervisor
        .register_lot(LotId::new(req.id), req.rstp_url)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": format!("Parking lot '{}' added", lot.id),
        })),
    ))
}

/// Replace the spot set of a lot
pub async fn set_parking_spots(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spots): Json<Vec<Spot>>,
) -> Result<impl IntoResponse, ApiError> {
    let lot_id = LotId::new(id);
    state.supervisor.set_spots(&lot_id, spots).await?;

    Ok(Json(json!({
        "status": format!("Parking spots added to '{}'", lot_id),
    })))
}

/// Latest occupancy of a lot and where to fetch its snapshot
pub async fn get_parking_lot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lot_id = LotId::new(id);
    let report = state.supervisor.get_occupancy(&lot_id).await?;

    let occupancy = match report {
        OccupancyReport::Available(counts) => json!(counts),
        OccupancyReport::Failed { reason } => json!({ "error": reason }),
        OccupancyReport::Pending => Value::Null,
    };

    Ok(Json(ParkingLotResponse {
        image_url: format!("/images/{}", lot_id),
        parking_lot_id: lot_id.0,
        occupancy,
    }))
}

/// Stop monitoring a lot and delete everything stored for it
pub async fn delete_parking_lot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lot_id = LotId::new(id);
    state.supervisor.remove_lot(&lot_id).await?;

    Ok(Json(json!({
        "status": format!("Parking lot '{}' removed", lot_id),
    })))
}

// ============================================================================
// IMAGE HANDLERS
// ============================================================================

/// Latest annotated snapshot, addressed as `<id>` or `<id>.png`
pub async fn serve_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lot_id = LotId::new(name.strip_suffix(".png").unwrap_or(&name));
    if lot_id.validate().is_err() {
        return Err(ApiError::not_found(format!("Image {} not found", name)));
    }

    match state.supervisor.get_snapshot(&lot_id).await? {
        Some(bytes) => {
            debug!(lot_id = %lot_id, bytes = bytes.len(), "Serving snapshot");
            Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
        }
        None => Err(ApiError::not_found(format!("Image {} not found", name))),
    }
}
