//! Records shared between the booking server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Lifecycle status of a booking. `Paid` is the only entry state and
/// `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Paid,
    Cancelled,
}

/// Authoritative record that a user purchased time-bounded use of a spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub spot_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hours: f64,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
    pub status: BookingStatus,
    #[serde(default)]
    pub payment_id: Option<String>,
    pub session_id: String,
    pub paid_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Paid
    }

    /// Whether this booking was created from the given payment session or
    /// payment id.
    pub fn matches_payment(&self, session_id: Option<&str>, payment_id: Option<&str>) -> bool {
        let by_session = session_id.is_some_and(|s| s == self.session_id);
        let by_payment = match (payment_id, self.payment_id.as_deref()) {
            (Some(wanted), Some(ours)) => wanted == ours,
            _ => false,
        };
        by_session || by_payment
    }
}

/// A listable parking location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: String,
    pub owner: String,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub bookings: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Fields owned by the listing screens (price, address, images). Carried
    /// through unchanged so a save never drops them.
    #[serde(flatten)]
    #[schema(ignore)]
    pub extra: Map<String, Value>,
}

fn default_available() -> bool {
    true
}

/// Identity record owned by the external auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(alias = "uid")]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Online/offline state of a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub username: String,
}

/// A relayed peer-to-peer chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
