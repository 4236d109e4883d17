//! Gateway opcodes, event types, and wire-format messages.
//!
//! Frames are JSON objects. Server → client frames carry `{op, t, s, d}`;
//! client → server frames carry `{op, t, d}`. Dispatch events are typed
//! through [`ServerEvent`] and [`ClientEvent`], whose variant names become the
//! `t` field and whose payloads become `d`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Booking, ChatMessage, PresenceRecord};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_RECONNECT: u8 = 7;

/// Reserved topic that every connection receives without joining.
pub const GLOBAL_TOPIC: &str = "global";

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0) from a typed event.
    pub fn dispatch(event: &ServerEvent, seq: u64) -> serde_json::Result<Self> {
        let (t, d) = split_tagged(serde_json::to_value(event)?);
        Ok(Self {
            op: OP_DISPATCH,
            t,
            s: Some(seq),
            d,
        })
    }

    /// Build a RECONNECT message (op=7) telling the client to reconnect.
    pub fn reconnect(reason: &str) -> Self {
        Self {
            op: OP_RECONNECT,
            t: None,
            s: None,
            d: serde_json::json!({ "reason": reason }),
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }

    /// Decode the typed event of a DISPATCH frame. Returns `None` for other
    /// opcodes.
    pub fn event(&self) -> Option<serde_json::Result<ServerEvent>> {
        if self.op != OP_DISPATCH {
            return None;
        }
        let t = self.t.as_deref()?;
        Some(serde_json::from_value(join_tagged(t, self.d.clone())))
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

impl ClientMessage {
    pub fn identify(payload: &IdentifyPayload) -> serde_json::Result<Self> {
        Ok(Self {
            op: OP_IDENTIFY,
            t: None,
            d: serde_json::to_value(payload)?,
        })
    }

    pub fn heartbeat(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT,
            t: None,
            d: serde_json::json!({ "seq": seq }),
        }
    }

    pub fn dispatch(event: &ClientEvent) -> serde_json::Result<Self> {
        let (t, d) = split_tagged(serde_json::to_value(event)?);
        Ok(Self {
            op: OP_DISPATCH,
            t,
            d,
        })
    }

    /// Decode the typed event of a DISPATCH frame.
    pub fn event(&self) -> serde_json::Result<ClientEvent> {
        let t = self.t.as_deref().unwrap_or_default();
        serde_json::from_value(join_tagged(t, self.d.clone()))
    }
}

fn split_tagged(mut value: Value) -> (Option<String>, Value) {
    let t = value
        .get("t")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let d = value.get_mut("d").map(Value::take).unwrap_or(Value::Null);
    (t, d)
}

fn join_tagged(t: &str, d: Value) -> Value {
    serde_json::json!({ "t": t, "d": d })
}

// ---------------------------------------------------------------------------
// IDENTIFY payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    pub uid: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

// ---------------------------------------------------------------------------
// HEARTBEAT payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Client dispatch events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRef {
    pub spot_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub recipient_id: String,
    pub message: String,
    /// Ignored by the server; the authenticated identity is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityChange {
    pub spot_id: String,
    pub available: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Events a client dispatches to the server (op=0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    JoinTopic(TopicRef),
    LeaveTopic(TopicRef),
    SendMessage(SendMessagePayload),
    TypingStart(TypingSignal),
    TypingStop(TypingSignal),
    SpotAvailabilityChange(AvailabilityChange),
}

// ---------------------------------------------------------------------------
// Server dispatch events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub connection_id: String,
    pub user_id: String,
    pub heartbeat_interval: u64,
}

/// Booking lifecycle notice sent to the spot owner or the booker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingNotice {
    pub title: String,
    pub message: String,
    pub booking: Booking,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityUpdate {
    pub spot_id: String,
    pub available: bool,
    pub reason: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotBooked {
    pub spot_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message: ChatMessage,
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub sender_id: String,
    pub typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Events the server dispatches to clients (op=0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    Ready(ReadyPayload),
    BookingReceived(BookingNotice),
    BookingConfirmed(BookingNotice),
    BookingCancelled(BookingNotice),
    SpotAvailabilityUpdated(AvailabilityUpdate),
    SpotBooked(SpotBooked),
    NewMessage(ChatMessage),
    MessageSent(MessageSent),
    UserTyping(TypingUpdate),
    PresenceUpdate(PresenceRecord),
    Announcement(Announcement),
    TopicJoined(TopicRef),
    TopicLeft(TopicRef),
}

impl ServerEvent {
    /// The dispatch name carried in the `t` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "READY",
            Self::BookingReceived(_) => "BOOKING_RECEIVED",
            Self::BookingConfirmed(_) => "BOOKING_CONFIRMED",
            Self::BookingCancelled(_) => "BOOKING_CANCELLED",
            Self::SpotAvailabilityUpdated(_) => "SPOT_AVAILABILITY_UPDATED",
            Self::SpotBooked(_) => "SPOT_BOOKED",
            Self::NewMessage(_) => "NEW_MESSAGE",
            Self::MessageSent(_) => "MESSAGE_SENT",
            Self::UserTyping(_) => "USER_TYPING",
            Self::PresenceUpdate(_) => "PRESENCE_UPDATE",
            Self::Announcement(_) => "ANNOUNCEMENT",
            Self::TopicJoined(_) => "TOPIC_JOINED",
            Self::TopicLeft(_) => "TOPIC_LEFT",
        }
    }
}
