//! Client-local notification center.
//!
//! Notifications are kept newest-insertion-first and shown in display order:
//! priority ascending, then timestamp descending, then newer insertion first.
//! The unread count is republished on a [`watch`] channel after every
//! mutation.

use std::cmp::Reverse;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parkspot_common::protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Booking,
    Message,
    Cancellation,
    Security,
    Availability,
    Payment,
    Announcement,
    Presence,
    System,
}

impl NotificationKind {
    /// Lower is more important.
    pub fn priority(self) -> u8 {
        match self {
            Self::Booking | Self::Message => 1,
            Self::Cancellation | Self::Security => 2,
            Self::Availability | Self::Payment => 3,
            Self::Announcement | Self::Presence | Self::System => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            data: Value::Null,
            timestamp,
            read: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Map a gateway dispatch to a notification. Events that are pure
    /// protocol chatter (acks, typing, presence) produce nothing.
    ///
    /// Ids are derived from the event so that a redelivered event lands on
    /// the same entry.
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        let notification = match event {
            ServerEvent::BookingReceived(notice) => Self::new(
                format!("booking-received:{}", notice.booking.id),
                NotificationKind::Booking,
                &notice.title,
                &notice.message,
                notice.timestamp,
            )
            .with_data(serde_json::to_value(&notice.booking).ok()?),
            ServerEvent::BookingConfirmed(notice) => Self::new(
                format!("booking:{}", notice.booking.id),
                NotificationKind::Booking,
                &notice.title,
                &notice.message,
                notice.timestamp,
            )
            .with_data(serde_json::to_value(&notice.booking).ok()?),
            ServerEvent::BookingCancelled(notice) => Self::new(
                format!("cancellation:{}", notice.booking.id),
                NotificationKind::Cancellation,
                &notice.title,
                &notice.message,
                notice.timestamp,
            )
            .with_data(serde_json::to_value(&notice.booking).ok()?),
            ServerEvent::SpotAvailabilityUpdated(update) => {
                let state = if update.available {
                    "available"
                } else {
                    "unavailable"
                };
                Self::new(
                    format!(
                        "availability:{}:{}",
                        update.spot_id,
                        update.last_updated.timestamp_millis()
                    ),
                    NotificationKind::Availability,
                    "Spot availability changed",
                    format!("Spot {} is now {state} ({})", update.spot_id, update.reason),
                    update.last_updated,
                )
                .with_data(serde_json::to_value(update).ok()?)
            }
            ServerEvent::NewMessage(message) => Self::new(
                format!("message:{}", message.id),
                NotificationKind::Message,
                format!("New message from {}", message.sender_name),
                &message.text,
                message.timestamp,
            )
            .with_data(serde_json::to_value(message).ok()?),
            ServerEvent::Announcement(announcement) => Self::new(
                format!(
                    "announcement:{}:{}",
                    announcement.timestamp.timestamp_millis(),
                    announcement.title
                ),
                NotificationKind::Announcement,
                &announcement.title,
                &announcement.message,
                announcement.timestamp,
            ),
            _ => return None,
        };
        Some(notification)
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    notification: Notification,
}

/// Ordered, capped, deduplicated notification list.
#[derive(Debug)]
pub struct NotificationCenter {
    /// Newest insertion at the front.
    entries: VecDeque<Entry>,
    next_seq: u64,
    capacity: usize,
    unread: watch::Sender<usize>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (unread, _) = watch::channel(0);
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            unread,
        }
    }

    /// Receiver that observes the unread count.
    pub fn subscribe_unread(&self) -> watch::Receiver<usize> {
        self.unread.subscribe()
    }

    /// Insert a notification. Returns `false` when an entry with the same id
    /// is already present; the existing entry is left untouched.
    pub fn push(&mut self, notification: Notification) -> bool {
        if self.contains(&notification.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_front(Entry { seq, notification });
        self.evict();
        self.publish_unread();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.notification.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries
            .iter()
            .map(|e| &e.notification)
            .find(|n| n.id == id)
    }

    /// Entries newest insertion first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter().map(|e| &e.notification)
    }

    /// Entries in display order.
    pub fn sorted(&self) -> Vec<&Notification> {
        let mut entries: Vec<&Entry> = self.entries.iter().collect();
        entries.sort_by_key(|e| {
            (
                e.notification.kind.priority(),
                Reverse(e.notification.timestamp),
                Reverse(e.seq),
            )
        });
        entries.into_iter().map(|e| &e.notification).collect()
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.notification.id == id) else {
            return false;
        };
        entry.notification.read = true;
        self.publish_unread();
        true
    }

    /// Returns how many entries flipped from unread to read.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.notification.read) {
            entry.notification.read = true;
            changed += 1;
        }
        self.publish_unread();
        changed
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let index = self.entries.iter().position(|e| e.notification.id == id)?;
        let removed = self.entries.remove(index).map(|e| e.notification);
        self.publish_unread();
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.publish_unread();
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.notification.read).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest read entries go first; unread ones only once no read entry is
    /// left.
    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .rposition(|e| e.notification.read)
                .unwrap_or(self.entries.len() - 1);
            self.entries.remove(victim);
        }
    }

    fn publish_unread(&self) {
        let count = self.unread_count();
        self.unread.send_if_modified(|current| {
            if *current == count {
                return false;
            }
            *current = count;
            true
        });
    }
}
