//! Signed payment event intake.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parkspot_common::models::Booking;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::signature::SignedBody;
use crate::booking::IntakeOutcome;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payments", post(payment_webhook))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    /// `created`, `already exists`, `cancelled`, `already cancelled` or
    /// `ignored`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
}

impl WebhookResponse {
    fn new(status: &str, booking: Option<Booking>) -> Self {
        Self {
            status: status.to_string(),
            booking,
        }
    }
}

fn respond(outcome: IntakeOutcome) -> (StatusCode, WebhookResponse) {
    match outcome {
        IntakeOutcome::Created(b) => (StatusCode::CREATED, WebhookResponse::new("created", Some(b))),
        IntakeOutcome::Duplicate(b) => (StatusCode::OK, WebhookResponse::new("already exists", Some(b))),
        IntakeOutcome::Cancelled(b) => (StatusCode::OK, WebhookResponse::new("cancelled", Some(b))),
        IntakeOutcome::AlreadyCancelled(b) => {
            (StatusCode::OK, WebhookResponse::new("already cancelled", Some(b)))
        }
        IntakeOutcome::Ignored { .. } => (StatusCode::OK, WebhookResponse::new("ignored", None)),
    }
}

// ---------------------------------------------------------------------------
// POST /api/v1/webhooks/payments
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payments",
    tag = "Webhooks",
    params(
        ("X-Payment-Signature" = String, Header, description = "t=<unix seconds>,v1=<hex HMAC-SHA256>"),
    ),
    request_body(content = String, description = "Raw payment event JSON", content_type = "application/json"),
    responses(
        (status = 201, description = "Booking created", body = WebhookResponse),
        (status = 200, description = "Duplicate, cancellation or ignored event", body = WebhookResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Invalid signature", body = ApiErrorBody),
        (status = 404, description = "Spot or user not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable, retry", body = ApiErrorBody),
    ),
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    SignedBody(body): SignedBody,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    let (status, response) = respond(state.intake.handle(&body).await?);
    Ok((status, Json(response)))
}
