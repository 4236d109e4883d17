use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use parkspot_common::models::PresenceRecord;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/presence/{user_id}", get(get_presence))
}

#[utoipa::path(
    get,
    path = "/api/v1/presence/{user_id}",
    tag = "Presence",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Current presence record", body = PresenceRecord),
        (status = 404, description = "User has never connected", body = ApiErrorBody),
    ),
)]
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceRecord>, ApiError> {
    state
        .presence
        .get(&user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No presence record for this user"))
}
