use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::booking::BookingError;

/// Machine-readable error class. Each code maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    ValidationError,
    Unauthorized,
    NotFound,
    /// Storage is temporarily unavailable; the caller should redeliver.
    PersistenceError,
    InternalError,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest | Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PersistenceError => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON envelope of every error response: `{"error": {code, message, details?}}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(ApiErrorDetail);

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self(ApiErrorDetail {
            code,
            message: message.into(),
            details: None,
        })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        let mut err = Self::new(ErrorCode::ValidationError, "Validation failed");
        err.0.details = Some(details);
        err
    }

    pub fn code(&self) -> ErrorCode {
        self.0.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code.status();
        (status, Json(ApiErrorBody { error: self.0 })).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(details) => Self::validation(details),
            BookingError::Auth(message) => Self::unauthorized(message),
            BookingError::NotFound(message) => {
                tracing::warn!(%message, "booking reference not found");
                Self::not_found(message)
            }
            BookingError::Persistence(err) if err.is_retryable() => {
                tracing::error!(?err, "retryable persistence failure");
                Self::new(
                    ErrorCode::PersistenceError,
                    "Storage temporarily unavailable, retry the request",
                )
            }
            BookingError::Persistence(err) => {
                tracing::error!(?err, "persistence failure");
                Self::new(ErrorCode::InternalError, "An internal error occurred")
            }
        }
    }
}
