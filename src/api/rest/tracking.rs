use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::location::{Coordinates, LocationRecord, SlotId};
use crate::publisher::StopReport;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/start", post(start_public))
        .route("/tracking/stop", post(stop_public))
        .route("/tracking/orders/:order_id/start", post(start_order))
        .route("/tracking/orders/:order_id/stop", post(stop_order))
        .route("/driver/fix", post(driver_fix))
        .route("/location/public", get(public_location))
        .route("/locations/active", get(active_locations))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTrackingRequest {
    pub driver_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverFixRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOrderLocation {
    pub order_id: String,
    #[serde(flatten)]
    pub record: LocationRecord,
}

async fn start_public(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<StartTrackingRequest>>,
) -> Result<Json<LocationRecord>, AppError> {
    let driver_name = payload.and_then(|Json(body)| body.driver_name);
    state.public_publisher.start(driver_name).await?;
    read_slot(&state, &SlotId::Public)
}

async fn stop_public(State(state): State<Arc<AppState>>) -> Json<StopReport> {
    Json(state.public_publisher.stop().await)
}

async fn start_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    payload: Option<Json<StartTrackingRequest>>,
) -> Result<Json<LocationRecord>, AppError> {
    if order_id.trim().is_empty() {
        return Err(AppError::BadRequest("order id cannot be empty".to_string()));
    }

    let driver_name = payload.and_then(|Json(body)| body.driver_name);
    let publisher = state.order_publisher(&order_id);
    publisher.start(driver_name).await?;
    read_slot(&state, &SlotId::Order(order_id))
}

async fn stop_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Json<StopReport> {
    let publisher = state.order_publisher(&order_id);
    Json(publisher.stop().await)
}

/// The driver device reporting a raw position fix. Feeds every publisher
/// sharing the device's geolocation channel.
async fn driver_fix(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DriverFixRequest>,
) -> Result<StatusCode, AppError> {
    if !(-90.0..=90.0).contains(&payload.latitude) {
        return Err(AppError::BadRequest(
            "latitude must be within [-90, 90]".to_string(),
        ));
    }
    if !(-180.0..=180.0).contains(&payload.longitude) {
        return Err(AppError::BadRequest(
            "longitude must be within [-180, 180]".to_string(),
        ));
    }

    state.geolocation.push_fix(Coordinates {
        latitude: payload.latitude,
        longitude: payload.longitude,
    });

    Ok(StatusCode::NO_CONTENT)
}

async fn public_location(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LocationRecord>, AppError> {
    read_slot(&state, &SlotId::Public)
}

async fn active_locations(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveOrderLocation>> {
    let active = state
        .store
        .active_order_slots()
        .into_iter()
        .map(|(order_id, record)| ActiveOrderLocation { order_id, record })
        .collect();
    Json(active)
}

fn read_slot(state: &AppState, slot: &SlotId) -> Result<Json<LocationRecord>, AppError> {
    let record = state
        .store
        .read(slot)
        .map_err(|err| AppError::Internal(err.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("no location recorded for {slot}")))?;
    Ok(Json(record))
}
