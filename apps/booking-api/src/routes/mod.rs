pub mod announcements;
pub mod bookings;
pub mod health;
pub mod presence;
pub mod spots;
pub mod webhooks;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            webhooks::router()
                .merge(announcements::router())
                .merge(bookings::router())
                .merge(spots::router())
                .merge(presence::router()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Webhooks
        webhooks::payment_webhook,
        announcements::publish_announcement,
        // State pull
        bookings::get_booking,
        bookings::list_user_bookings,
        spots::get_spot,
        presence::get_presence,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::ErrorCode,
            crate::error::FieldError,
            // Models
            parkspot_common::models::Booking,
            parkspot_common::models::BookingStatus,
            parkspot_common::models::Spot,
            parkspot_common::models::PresenceRecord,
            // Route request/response types
            health::HealthResponse,
            webhooks::WebhookResponse,
            announcements::AnnouncementRequest,
            announcements::AnnouncementResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Webhooks", description = "Signed payment events"),
        (name = "Announcements", description = "Global announcements"),
        (name = "Bookings", description = "Booking lookups"),
        (name = "Spots", description = "Spot lookups"),
        (name = "Presence", description = "User presence"),
    )
)]
pub struct ApiDoc;
