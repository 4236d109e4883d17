use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    /// Journaled transactions still waiting for a successful collection save.
    pub unreconciled: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let unreconciled = state.store.unreconciled().await;
    Json(HealthResponse {
        status: if unreconciled == 0 { "ok" } else { "degraded" }.to_string(),
        connections: state.connections.len(),
        unreconciled,
    })
}
