//! Peer-to-peer chat relay and typing indicators.
//!
//! Messages are relayed to the recipient's active connection and never
//! stored. The sender always gets a `MESSAGE_SENT` acknowledgement saying
//! whether the recipient was reachable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parkspot_common::conversation::conversation_id;
use parkspot_common::id::{prefix, prefixed_ulid};
use parkspot_common::models::ChatMessage;
use parkspot_common::protocol::{MessageSent, SendMessagePayload, ServerEvent, TypingUpdate};

use super::fanout::TopicRouter;
use super::session::GatewaySession;
use super::ChannelError;

pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Live typing indicators keyed by (sender, recipient).
#[derive(Default)]
pub struct TypingTracker {
    entries: DashMap<(String, String), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or refresh an indicator. Returns `true` if it was not already
    /// active.
    pub fn start(&self, sender_id: &str, recipient_id: &str) -> bool {
        self.entries
            .insert((sender_id.to_string(), recipient_id.to_string()), Instant::now())
            .is_none()
    }

    pub fn stop(&self, sender_id: &str, recipient_id: &str) -> bool {
        self.entries
            .remove(&(sender_id.to_string(), recipient_id.to_string()))
            .is_some()
    }

    pub fn is_typing(&self, sender_id: &str, recipient_id: &str) -> bool {
        self.entries
            .contains_key(&(sender_id.to_string(), recipient_id.to_string()))
    }

    /// Remove every indicator started by `sender_id`. Returns the recipients
    /// that were being shown one.
    pub fn clear_sender(&self, sender_id: &str) -> Vec<String> {
        let keys: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == sender_id)
            .map(|e| e.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|((_, recipient), _)| recipient))
            .collect()
    }

    /// Remove indicators idle for at least `timeout` as of `now`.
    pub fn expire(&self, timeout: Duration, now: Instant) -> Vec<(String, String)> {
        let stale: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) >= timeout)
            .map(|e| e.key().clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, at| now.saturating_duration_since(*at) >= timeout)
                    .map(|(key, _)| key)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct MessagingChannel {
    router: Arc<TopicRouter>,
    typing: TypingTracker,
    typing_timeout: Duration,
}

impl MessagingChannel {
    pub fn new(router: Arc<TopicRouter>, typing_timeout: Duration) -> Self {
        Self {
            router,
            typing: TypingTracker::new(),
            typing_timeout,
        }
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Relay a chat message from the session's user. Any sender fields in the
    /// payload are ignored in favour of the authenticated identity.
    pub fn send(
        &self,
        session: &GatewaySession,
        payload: SendMessagePayload,
    ) -> Result<MessageSent, ChannelError> {
        let text = payload.message.trim();
        if text.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChannelError::MessageTooLong(MAX_MESSAGE_CHARS));
        }
        let recipient_id = payload.recipient_id.trim();
        if recipient_id.is_empty() {
            return Err(ChannelError::InvalidRecipient);
        }

        let message = ChatMessage {
            id: prefixed_ulid(prefix::MESSAGE),
            conversation_id: conversation_id(&session.user_id, recipient_id),
            sender_id: session.user_id.clone(),
            sender_name: session.username.clone(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };

        self.typing.stop(&session.user_id, recipient_id);

        let delivered = match self
            .router
            .send_to_user(recipient_id, ServerEvent::NewMessage(message.clone()))
        {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(message_id = %message.id, %err, "message not delivered");
                false
            }
        };

        let ack = MessageSent { message, delivered };
        self.router
            .send_to_connection(&session.connection_id, ServerEvent::MessageSent(ack.clone()));
        Ok(ack)
    }

    /// Forward a typing start/stop from the session's user to the recipient.
    pub fn set_typing(
        &self,
        session: &GatewaySession,
        recipient_id: &str,
        typing: bool,
    ) -> Result<(), ChannelError> {
        let recipient_id = recipient_id.trim();
        if recipient_id.is_empty() {
            return Err(ChannelError::InvalidRecipient);
        }
        if typing {
            self.typing.start(&session.user_id, recipient_id);
        } else {
            self.typing.stop(&session.user_id, recipient_id);
        }
        self.notify_typing(&session.user_id, recipient_id, typing);
        Ok(())
    }

    /// Clear every indicator the user had running, telling each recipient.
    pub fn clear_typing(&self, sender_id: &str) {
        for recipient_id in self.typing.clear_sender(sender_id) {
            self.notify_typing(sender_id, &recipient_id, false);
        }
    }

    /// Expire idle indicators and emit `typing: false` for each. Returns how
    /// many expired.
    pub fn sweep_typing(&self) -> usize {
        let expired = self.typing.expire(self.typing_timeout, Instant::now());
        for (sender_id, recipient_id) in &expired {
            self.notify_typing(sender_id, recipient_id, false);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "expired typing indicators");
        }
        expired.len()
    }

    fn notify_typing(&self, sender_id: &str, recipient_id: &str, typing: bool) {
        let event = ServerEvent::UserTyping(TypingUpdate {
            sender_id: sender_id.to_string(),
            typing,
        });
        if let Err(err) = self.router.send_to_user(recipient_id, event) {
            tracing::trace!(%err, "typing update dropped");
        }
    }
}
