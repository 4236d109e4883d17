//! Operator announcements broadcast on the global topic.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::signature::SignedBody;
use crate::bus::DomainEvent;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/announcements", post(publish_announcement))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnnouncementRequest {
    pub title: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnnouncementResponse {
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/announcements",
    tag = "Announcements",
    params(
        ("X-Payment-Signature" = String, Header, description = "t=<unix seconds>,v1=<hex HMAC-SHA256>"),
    ),
    request_body = AnnouncementRequest,
    responses(
        (status = 202, description = "Announcement published", body = AnnouncementResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Invalid signature", body = ApiErrorBody),
    ),
)]
pub async fn publish_announcement(
    State(state): State<AppState>,
    SignedBody(body): SignedBody,
) -> Result<(StatusCode, Json<AnnouncementResponse>), ApiError> {
    let req: AnnouncementRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(vec![FieldError::new("body", e.to_string())]))?;

    let mut errors = Vec::new();
    let title = required(req.title, "title", &mut errors);
    let message = required(req.message, "message", &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    tracing::info!(%title, "publishing announcement");
    state.bus.publish(DomainEvent::Announcement { title, message });

    Ok((
        StatusCode::ACCEPTED,
        Json(AnnouncementResponse {
            status: "published".to_string(),
        }),
    ))
}

fn required(value: Option<String>, field: &str, errors: &mut Vec<FieldError>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            errors.push(FieldError::new(field, format!("{field} is required")));
            String::new()
        }
    }
}
