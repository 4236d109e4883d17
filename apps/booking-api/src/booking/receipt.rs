//! Fire-and-forget trigger for the external receipt pipeline.

use std::time::Duration;

use serde::Serialize;

use crate::bus::{DomainEvent, EventHandler};

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptRequest<'a> {
    booking_id: &'a str,
    user_email: &'a str,
    spot_title: &'a str,
    booking: &'a parkspot_common::models::Booking,
}

/// Posts confirmed bookings to `RECEIPT_WEBHOOK_URL`. Failures are logged and
/// never reach the booking path.
pub struct ReceiptTrigger {
    client: reqwest::Client,
    url: Option<String>,
}

impl ReceiptTrigger {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl EventHandler for ReceiptTrigger {
    fn name(&self) -> &'static str {
        "receipt"
    }

    fn handle(&self, event: &DomainEvent) {
        let DomainEvent::BookingConfirmed { booking, spot } = event else {
            return;
        };
        let Some(url) = self.url.clone() else {
            tracing::debug!(booking_id = %booking.id, "receipt pipeline not configured");
            return;
        };

        let body = match serde_json::to_value(ReceiptRequest {
            booking_id: &booking.id,
            user_email: &booking.user_email,
            spot_title: &spot.title,
            booking,
        }) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(booking_id = %booking.id, ?err, "failed to encode receipt request");
                return;
            }
        };

        let client = self.client.clone();
        let booking_id = booking.id.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .timeout(RECEIPT_TIMEOUT)
                .json(&body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(_) => tracing::info!(%booking_id, "receipt generation triggered"),
                Err(err) => tracing::warn!(%booking_id, %err, "receipt trigger failed"),
            }
        });
    }
}
