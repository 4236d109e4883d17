//! Payment provider event envelope and booking metadata parsing.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FieldError;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";
pub const BOOKING_CANCELLED: &str = "booking.cancelled";

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: PaymentObject,
}

/// The checkout session (or charge) the event is about.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentObject {
    /// Checkout session id; the primary idempotency key.
    pub id: String,
    #[serde(default, alias = "paymentIntent")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// What an event asks the intake to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Confirm,
    Cancel,
    Ignore,
}

impl PaymentEvent {
    pub fn parse(body: &[u8]) -> Result<Self, Vec<FieldError>> {
        serde_json::from_slice(body)
            .map_err(|err| vec![FieldError::new("body", format!("Invalid event payload: {err}"))])
    }

    pub fn action(&self) -> EventAction {
        match self.kind.as_str() {
            CHECKOUT_COMPLETED => EventAction::Confirm,
            CHARGE_REFUNDED | BOOKING_CANCELLED => EventAction::Cancel,
            _ => EventAction::Ignore,
        }
    }
}

impl PaymentObject {
    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_intent.as_deref().filter(|s| !s.is_empty())
    }
}

/// Booking details carried in checkout metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingMetadata {
    pub spot_id: String,
    pub user_id: String,
    pub price: f64,
    pub spot_title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hours: f64,
}

impl BookingMetadata {
    /// Validate metadata, collecting every problem rather than stopping at the
    /// first.
    pub fn parse(metadata: &Map<String, Value>) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let spot_id = required_string(metadata, "spotId", &mut errors);
        let user_id = required_string(metadata, "userId", &mut errors);
        let spot_title = required_string(metadata, "spotTitle", &mut errors);
        let start_time = required_time(metadata, "startTime", &mut errors);
        let end_time = required_time(metadata, "endTime", &mut errors);

        let price = match number(metadata, "price") {
            Ok(Some(p)) if p >= 0.0 => Some(p),
            Ok(Some(_)) => {
                errors.push(FieldError::new("price", "Price must not be negative"));
                None
            }
            Ok(None) => {
                errors.push(FieldError::new("price", "Price is required"));
                None
            }
            Err(e) => {
                errors.push(e);
                None
            }
        };

        let hours = match number(metadata, "hours") {
            Ok(Some(h)) if h > 0.0 => Some(h),
            Ok(Some(_)) => {
                errors.push(FieldError::new("hours", "Hours must be positive"));
                None
            }
            Ok(None) => Some(1.0),
            Err(e) => {
                errors.push(e);
                None
            }
        };

        if let (Some(start), Some(end)) = (start_time, end_time) {
            if end <= start {
                errors.push(FieldError::new("endTime", "End time must be after start time"));
            }
        }

        match (spot_id, user_id, price, spot_title, start_time, end_time, hours) {
            (Some(spot_id), Some(user_id), Some(price), Some(spot_title), Some(start_time), Some(end_time), Some(hours))
                if errors.is_empty() =>
            {
                Ok(Self {
                    spot_id,
                    user_id,
                    price,
                    spot_title,
                    start_time,
                    end_time,
                    hours,
                })
            }
            _ => Err(errors),
        }
    }
}

fn required_string(map: &Map<String, Value>, key: &str, errors: &mut Vec<FieldError>) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            errors.push(FieldError::new(key, format!("{key} is required")));
            None
        }
        Some(_) => {
            errors.push(FieldError::new(key, format!("{key} must be a string")));
            None
        }
    }
}

fn required_time(map: &Map<String, Value>, key: &str, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    let raw = required_string(map, key, errors)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(key, format!("{key} must be an RFC 3339 timestamp")));
            None
        }
    }
}

/// Numbers arrive either as JSON numbers or as numeric strings (payment
/// providers stringify metadata).
fn number(map: &Map<String, Value>, key: &str) -> Result<Option<f64>, FieldError> {
    let parsed = match map.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(FieldError::new(key, format!("{key} must be a number"))),
    }
}
