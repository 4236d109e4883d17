//! In-process domain event bus.
//!
//! Producers publish a [`DomainEvent`]; handlers registered for its
//! [`EventKind`] run synchronously and must not block. Anything slow (network
//! calls, disk) is spawned by the handler itself.

use std::collections::HashMap;
use std::sync::Arc;

use parkspot_common::models::{Booking, PresenceRecord, Spot};

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    BookingConfirmed {
        booking: Booking,
        spot: Spot,
    },
    BookingCancelled {
        booking: Booking,
        /// `None` when the booking references a spot that no longer exists.
        spot: Option<Spot>,
    },
    AvailabilityChanged {
        spot_id: String,
        available: bool,
        reason: String,
        changed_by: String,
    },
    PresenceChanged(PresenceRecord),
    Announcement {
        title: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BookingConfirmed,
    BookingCancelled,
    AvailabilityChanged,
    PresenceChanged,
    Announcement,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::BookingConfirmed,
        EventKind::BookingCancelled,
        EventKind::AvailabilityChanged,
        EventKind::PresenceChanged,
        EventKind::Announcement,
    ];
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BookingConfirmed { .. } => EventKind::BookingConfirmed,
            Self::BookingCancelled { .. } => EventKind::BookingCancelled,
            Self::AvailabilityChanged { .. } => EventKind::AvailabilityChanged,
            Self::PresenceChanged(_) => EventKind::PresenceChanged,
            Self::Announcement { .. } => EventKind::Announcement,
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &DomainEvent);
}

/// Handler table keyed by event kind. Built once during startup.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kinds: &[EventKind], handler: Arc<dyn EventHandler>) {
        for kind in kinds {
            self.handlers.entry(*kind).or_default().push(handler.clone());
        }
    }

    /// Deliver `event` to every handler registered for its kind. Returns the
    /// number of handlers invoked.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let kind = event.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            tracing::debug!(?kind, "no handlers for domain event");
            return 0;
        };
        for handler in handlers {
            tracing::trace!(?kind, handler = handler.name(), "dispatching domain event");
            handler.handle(&event);
        }
        handlers.len()
    }
}
