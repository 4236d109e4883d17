//! Topic broadcast router.
//!
//! Uses a single `tokio::sync::broadcast` channel. Every connected session
//! subscribes once and filters envelopes locally by audience, which keeps the
//! publish order identical for every receiver. Delivery is at-most-once: a
//! receiver that lags skips the events it missed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parkspot_common::protocol::{
    Announcement, AvailabilityUpdate, BookingNotice, ServerEvent, SpotBooked, GLOBAL_TOPIC,
};
use tokio::sync::{broadcast, watch};

use super::registry::ConnectionRegistry;
use super::ChannelError;
use crate::bus::{DomainEvent, EventHandler};

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Who an envelope is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Connections currently joined to a spot topic.
    Topic(String),
    /// Every connection.
    Global,
    /// A single connection, resolved from a user id at publish time.
    Connection(String),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub event: ServerEvent,
}

pub struct TopicRouter {
    sender: broadcast::Sender<Arc<Envelope>>,
    /// connection id -> joined topics
    subscriptions: DashMap<String, HashSet<String>>,
    connections: Arc<ConnectionRegistry>,
    shutdown: watch::Sender<bool>,
}

impl TopicRouter {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            sender,
            subscriptions: DashMap::new(),
            connections,
            shutdown,
        }
    }

    /// Subscribe to the broadcast channel. Each gateway session should call
    /// this once, before it is announced as ready.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }

    /// Join `topic`. Returns `false` if the connection was already joined or
    /// the topic is the implicit global one.
    pub fn join(&self, connection_id: &str, topic: &str) -> Result<bool, ChannelError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ChannelError::InvalidTopic);
        }
        if topic == GLOBAL_TOPIC {
            return Ok(false);
        }
        Ok(self
            .subscriptions
            .entry(connection_id.to_string())
            .or_default()
            .insert(topic.to_string()))
    }

    pub fn leave(&self, connection_id: &str, topic: &str) -> bool {
        let Some(mut topics) = self.subscriptions.get_mut(connection_id) else {
            return false;
        };
        topics.remove(topic.trim())
    }

    /// Forget every subscription held by a connection. Returns how many topics
    /// it had joined.
    pub fn drop_connection(&self, connection_id: &str) -> usize {
        self.subscriptions
            .remove(connection_id)
            .map(|(_, topics)| topics.len())
            .unwrap_or(0)
    }

    pub fn is_joined(&self, connection_id: &str, topic: &str) -> bool {
        topic == GLOBAL_TOPIC
            || self
                .subscriptions
                .get(connection_id)
                .is_some_and(|topics| topics.contains(topic))
    }

    /// Connections currently joined to `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().contains(topic))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn publish(&self, topic: &str, event: ServerEvent) {
        if topic == GLOBAL_TOPIC {
            self.publish_global(event);
        } else {
            self.emit(Audience::Topic(topic.to_string()), event);
        }
    }

    pub fn publish_global(&self, event: ServerEvent) {
        self.emit(Audience::Global, event);
    }

    /// Deliver to the user's active connection only.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> Result<(), ChannelError> {
        let connection_id = self
            .connections
            .active_connection(user_id)
            .ok_or_else(|| ChannelError::RecipientOffline(user_id.to_string()))?;
        self.send_to_connection(&connection_id, event);
        Ok(())
    }

    pub fn send_to_connection(&self, connection_id: &str, event: ServerEvent) {
        self.emit(Audience::Connection(connection_id.to_string()), event);
    }

    /// Whether the connection should forward `envelope` to its socket.
    pub fn should_deliver(&self, connection_id: &str, envelope: &Envelope) -> bool {
        match &envelope.audience {
            Audience::Global => true,
            Audience::Topic(topic) => self.is_joined(connection_id, topic),
            Audience::Connection(target) => target == connection_id,
        }
    }

    /// Signal every session loop to close.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn emit(&self, audience: Audience, event: ServerEvent) {
        tracing::trace!(?audience, event = event.name(), "publishing");
        // send() returns Err if there are no receivers, which is fine.
        let _ = self.sender.send(Arc::new(Envelope { audience, event }));
    }
}

/// One outbound delivery derived from a domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    User(String, ServerEvent),
    Topic(String, ServerEvent),
    Global(ServerEvent),
}

/// Map a domain event to the client events it produces.
pub fn outbound(event: &DomainEvent) -> Vec<Outbound> {
    let now = Utc::now();
    match event {
        DomainEvent::BookingConfirmed { booking, spot } => {
            let to_owner = BookingNotice {
                title: "New booking".to_string(),
                message: format!("{} booked {}", booking.user_name, spot.title),
                booking: booking.clone(),
                timestamp: now,
            };
            let to_booker = BookingNotice {
                title: "Booking confirmed".to_string(),
                message: format!("Your booking for {} is confirmed", spot.title),
                booking: booking.clone(),
                timestamp: now,
            };
            vec![
                Outbound::User(spot.owner.clone(), ServerEvent::BookingReceived(to_owner)),
                Outbound::User(booking.user_id.clone(), ServerEvent::BookingConfirmed(to_booker)),
                Outbound::Topic(
                    spot.id.clone(),
                    ServerEvent::SpotBooked(SpotBooked {
                        spot_id: spot.id.clone(),
                        timestamp: now,
                    }),
                ),
                Outbound::Topic(
                    spot.id.clone(),
                    ServerEvent::SpotAvailabilityUpdated(AvailabilityUpdate {
                        spot_id: spot.id.clone(),
                        available: false,
                        reason: "booked".to_string(),
                        last_updated: now,
                    }),
                ),
            ]
        }
        DomainEvent::BookingCancelled { booking, spot } => {
            let title = spot.as_ref().map(|s| s.title.as_str()).unwrap_or("your spot");
            let notice = ServerEvent::BookingCancelled(BookingNotice {
                title: "Booking cancelled".to_string(),
                message: format!("The booking for {title} was cancelled"),
                booking: booking.clone(),
                timestamp: now,
            });
            let mut out = vec![Outbound::User(booking.user_id.clone(), notice.clone())];
            if let Some(spot) = spot {
                if spot.owner != booking.user_id {
                    out.push(Outbound::User(spot.owner.clone(), notice));
                }
                out.push(Outbound::Topic(
                    spot.id.clone(),
                    ServerEvent::SpotAvailabilityUpdated(AvailabilityUpdate {
                        spot_id: spot.id.clone(),
                        available: spot.available,
                        reason: "cancelled".to_string(),
                        last_updated: now,
                    }),
                ));
            }
            out
        }
        DomainEvent::AvailabilityChanged {
            spot_id,
            available,
            reason,
            ..
        } => vec![Outbound::Topic(
            spot_id.clone(),
            ServerEvent::SpotAvailabilityUpdated(AvailabilityUpdate {
                spot_id: spot_id.clone(),
                available: *available,
                reason: reason.clone(),
                last_updated: now,
            }),
        )],
        DomainEvent::PresenceChanged(record) => {
            vec![Outbound::Global(ServerEvent::PresenceUpdate(record.clone()))]
        }
        DomainEvent::Announcement { title, message } => {
            vec![Outbound::Global(ServerEvent::Announcement(Announcement {
                title: title.clone(),
                message: message.clone(),
                timestamp: now,
            }))]
        }
    }
}

/// Bus handler that pushes domain events onto the router.
pub struct FanoutHandler {
    router: Arc<TopicRouter>,
}

impl FanoutHandler {
    pub fn new(router: Arc<TopicRouter>) -> Self {
        Self { router }
    }
}

impl EventHandler for FanoutHandler {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn handle(&self, event: &DomainEvent) {
        for delivery in outbound(event) {
            match delivery {
                Outbound::User(user_id, event) => {
                    let name = event.name();
                    if let Err(err) = self.router.send_to_user(&user_id, event) {
                        tracing::debug!(%user_id, event = name, %err, "user event dropped");
                    }
                }
                Outbound::Topic(topic, event) => self.router.publish(&topic, event),
                Outbound::Global(event) => self.router.publish_global(event),
            }
        }
    }
}
