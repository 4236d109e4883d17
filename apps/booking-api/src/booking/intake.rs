//! Idempotent conversion of verified payment events into bookings.

use std::sync::Arc;

use chrono::Utc;
use parkspot_common::id::{prefix, prefixed_ulid};
use parkspot_common::models::{Booking, BookingStatus};

use super::event::{BookingMetadata, EventAction, PaymentEvent, PaymentObject};
use super::locks::KeyedLocks;
use super::BookingError;
use crate::bus::{DomainEvent, EventBus};
use crate::db::journal::Mutation;
use crate::db::store::BookingStore;

/// What processing a payment event did.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Created(Booking),
    /// The event was already processed; the existing booking is returned
    /// unmodified.
    Duplicate(Booking),
    Cancelled(Booking),
    AlreadyCancelled(Booking),
    Ignored { event_type: String },
}

pub struct PaymentIntake {
    store: Arc<BookingStore>,
    bus: Arc<EventBus>,
    locks: KeyedLocks,
}

impl PaymentIntake {
    pub fn new(store: Arc<BookingStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            locks: KeyedLocks::new(),
        }
    }

    /// Process a signature-verified event body.
    pub async fn handle(&self, body: &[u8]) -> Result<IntakeOutcome, BookingError> {
        let event = PaymentEvent::parse(body).map_err(BookingError::Validation)?;
        tracing::debug!(event_id = %event.id, event_type = %event.kind, "payment event received");

        match event.action() {
            EventAction::Confirm => self.confirm(&event.data.object).await,
            EventAction::Cancel => self.cancel(&event.data.object).await,
            EventAction::Ignore => {
                tracing::info!(event_id = %event.id, event_type = %event.kind, "ignoring payment event");
                Ok(IntakeOutcome::Ignored {
                    event_type: event.kind,
                })
            }
        }
    }

    /// Create the booking for a completed checkout, at most once per session
    /// id / payment id.
    pub async fn confirm(&self, object: &PaymentObject) -> Result<IntakeOutcome, BookingError> {
        let meta = BookingMetadata::parse(&object.metadata).map_err(BookingError::Validation)?;
        let session_id = object.session_id();
        let payment_id = object.payment_id();

        let guard = self
            .locks
            .acquire(&[session_id, payment_id.unwrap_or_default()])
            .await;
        let mut txn = self.store.begin().await;

        if let Some(existing) = txn.find_by_payment(Some(session_id), payment_id) {
            tracing::info!(
                booking_id = %existing.id,
                %session_id,
                "duplicate payment confirmation skipped"
            );
            return Ok(IntakeOutcome::Duplicate(existing.clone()));
        }

        let mut spot = txn
            .load_spot(&meta.spot_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Spot {} not found", meta.spot_id)))?;
        let user = txn
            .load_user(&meta.user_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("User {} not found", meta.user_id)))?;

        let now = Utc::now();
        let user_name = if user.display_name.is_empty() {
            user.email.clone()
        } else {
            user.display_name.clone()
        };
        let booking = Booking {
            id: prefixed_ulid(prefix::BOOKING),
            spot_id: spot.id.clone(),
            user_id: user.id.clone(),
            user_name,
            user_email: user.email.clone(),
            start_time: meta.start_time,
            end_time: meta.end_time,
            hours: meta.hours,
            total_price: meta.price,
            created_at: now,
            status: BookingStatus::Paid,
            payment_id: payment_id.map(str::to_owned),
            session_id: session_id.to_string(),
            paid_at: now,
            cancelled_at: None,
        };

        spot.bookings.push(booking.id.clone());
        spot.available = false;
        if spot.title.is_empty() {
            spot.title = meta.spot_title.clone();
        }

        let receipt = txn
            .commit(vec![
                Mutation::PutBooking(booking.clone()),
                Mutation::PutSpot(spot.clone()),
            ])
            .await?;
        drop(guard);

        tracing::info!(
            booking_id = %booking.id,
            spot_id = %booking.spot_id,
            user_id = %booking.user_id,
            txn_id = %receipt.txn_id,
            reconciliation_pending = receipt.reconciliation_pending,
            "booking created"
        );

        self.bus.publish(DomainEvent::BookingConfirmed {
            booking: booking.clone(),
            spot,
        });

        Ok(IntakeOutcome::Created(booking))
    }

    /// Move the booking matched by session id or payment id to `cancelled`
    /// and recompute its spot's availability.
    pub async fn cancel(&self, object: &PaymentObject) -> Result<IntakeOutcome, BookingError> {
        let session_id = object.session_id();
        let payment_id = object.payment_id();

        let guard = self
            .locks
            .acquire(&[session_id, payment_id.unwrap_or_default()])
            .await;
        let mut txn = self.store.begin().await;

        let mut booking = txn
            .find_by_payment(Some(session_id), payment_id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound("No booking for this payment".to_string()))?;

        if booking.status == BookingStatus::Cancelled {
            tracing::info!(booking_id = %booking.id, "booking already cancelled");
            return Ok(IntakeOutcome::AlreadyCancelled(booking));
        }

        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(Utc::now());

        let mut mutations = vec![Mutation::PutBooking(booking.clone())];
        let still_held = txn
            .bookings_for_spot(&booking.spot_id)
            .any(|b| b.id != booking.id && b.is_active());
        let spot = txn.load_spot(&booking.spot_id).await?.map(|mut spot| {
            spot.available = !still_held;
            spot
        });
        match &spot {
            Some(spot) => mutations.push(Mutation::PutSpot(spot.clone())),
            None => tracing::warn!(
                booking_id = %booking.id,
                spot_id = %booking.spot_id,
                "cancelled booking references a missing spot"
            ),
        }

        let receipt = txn.commit(mutations).await?;
        drop(guard);

        tracing::info!(
            booking_id = %booking.id,
            txn_id = %receipt.txn_id,
            reconciliation_pending = receipt.reconciliation_pending,
            "booking cancelled"
        );

        self.bus.publish(DomainEvent::BookingCancelled {
            booking: booking.clone(),
            spot,
        });

        Ok(IntakeOutcome::Cancelled(booking))
    }
}
