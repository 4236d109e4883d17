//! Read-only booking lookups for clients pulling state after a reconnect.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use parkspot_common::models::Booking;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/users/{user_id}/bookings", get(list_user_bookings))
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings/{booking_id}",
    tag = "Bookings",
    params(("booking_id" = String, Path, description = "Booking ID")),
    responses(
        (status = 200, description = "Booking", body = Booking),
        (status = 404, description = "Booking not found", body = ApiErrorBody),
    ),
)]
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    state
        .store
        .booking(&booking_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Booking not found"))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/bookings",
    tag = "Bookings",
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Bookings made by the user, newest first", body = Vec<Booking>),
    ),
)]
pub async fn list_user_bookings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<Booking>> {
    let mut bookings = state.store.bookings_for_user(&user_id).await;
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(bookings)
}
