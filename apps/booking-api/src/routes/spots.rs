use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use parkspot_common::models::Spot;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/spots/{spot_id}", get(get_spot))
}

#[utoipa::path(
    get,
    path = "/api/v1/spots/{spot_id}",
    tag = "Spots",
    params(("spot_id" = String, Path, description = "Spot ID")),
    responses(
        (status = 200, description = "Spot with its persisted availability", body = Spot),
        (status = 404, description = "Spot not found", body = ApiErrorBody),
    ),
)]
pub async fn get_spot(
    State(state): State<AppState>,
    Path(spot_id): Path<String>,
) -> Result<Json<Spot>, ApiError> {
    state
        .store
        .spot(&spot_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Spot not found"))
}
