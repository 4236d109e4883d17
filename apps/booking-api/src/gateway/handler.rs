//! Incoming opcode handling: IDENTIFY, client dispatches, and disconnect.

use chrono::Utc;
use parkspot_common::id::{prefix, prefixed_ulid};
use parkspot_common::protocol::{
    ClientEvent, GatewayMessage, IdentifyPayload, ReadyPayload, ServerEvent, TopicRef,
};

use crate::bus::DomainEvent;
use crate::AppState;

use super::registry::ConnectionInfo;
use super::session::GatewaySession;
use super::ChannelError;

/// Heartbeat interval sent to clients in the READY payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 41250;

/// Process an IDENTIFY opcode: register the connection, mark the user online
/// and build the READY message.
pub async fn handle_identify(
    state: &AppState,
    payload: IdentifyPayload,
) -> Result<(GatewaySession, GatewayMessage), &'static str> {
    let user_id = payload.uid.trim().to_string();
    if user_id.is_empty() {
        return Err("Missing uid");
    }

    let username = match payload.username.trim() {
        "" => state
            .store
            .user(&user_id)
            .await
            .map(|u| u.display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user_id.clone()),
        name => name.to_string(),
    };

    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let displaced = state.connections.register(ConnectionInfo {
        connection_id: connection_id.clone(),
        user_id: user_id.clone(),
        username: username.clone(),
        email: payload.email.clone(),
        connected_at: Utc::now(),
    });
    if let Some(previous) = displaced {
        tracing::info!(%user_id, %previous, current = %connection_id, "connection displaced by newer one");
    }

    let record = state.presence.set_online(&user_id, &username);
    state.bus.publish(DomainEvent::PresenceChanged(record));

    let session = GatewaySession::new(connection_id.clone(), user_id.clone(), username);
    let ready = ServerEvent::Ready(ReadyPayload {
        connection_id,
        user_id,
        heartbeat_interval: HEARTBEAT_INTERVAL_MS,
    });
    let ready_msg =
        GatewayMessage::dispatch(&ready, session.next_seq()).map_err(|_| "Failed to encode READY")?;

    Ok((session, ready_msg))
}

/// Act on a client dispatch (op 0).
pub async fn handle_dispatch(
    state: &AppState,
    session: &GatewaySession,
    event: ClientEvent,
) -> Result<(), ChannelError> {
    match event {
        ClientEvent::JoinTopic(TopicRef { spot_id }) => {
            state.router.join(&session.connection_id, &spot_id)?;
            tracing::debug!(connection_id = %session.connection_id, %spot_id, "joined topic");
            state
                .router
                .send_to_connection(&session.connection_id, ServerEvent::TopicJoined(TopicRef { spot_id }));
        }
        ClientEvent::LeaveTopic(TopicRef { spot_id }) => {
            state.router.leave(&session.connection_id, &spot_id);
            state
                .router
                .send_to_connection(&session.connection_id, ServerEvent::TopicLeft(TopicRef { spot_id }));
        }
        ClientEvent::SendMessage(payload) => {
            state.messaging.send(session, payload)?;
        }
        ClientEvent::TypingStart(signal) => {
            state.messaging.set_typing(session, &signal.recipient_id, true)?;
        }
        ClientEvent::TypingStop(signal) => {
            state.messaging.set_typing(session, &signal.recipient_id, false)?;
        }
        ClientEvent::SpotAvailabilityChange(change) => {
            let spot = state
                .store
                .spot(&change.spot_id)
                .await
                .ok_or_else(|| ChannelError::UnknownSpot(change.spot_id.clone()))?;
            if spot.owner != session.user_id {
                return Err(ChannelError::NotOwner {
                    user_id: session.user_id.clone(),
                    spot_id: spot.id,
                });
            }
            state.bus.publish(DomainEvent::AvailabilityChanged {
                spot_id: spot.id,
                available: change.available,
                reason: change.reason.unwrap_or_else(|| "updated".to_string()),
                changed_by: session.user_id.clone(),
            });
        }
    }
    Ok(())
}

/// Tear down a connection. The user goes offline only if this was still
/// their active connection.
pub fn handle_disconnect(state: &AppState, session: &GatewaySession) {
    state.router.drop_connection(&session.connection_id);

    let Some(gone) = state.connections.unregister(&session.connection_id) else {
        return;
    };
    if !gone.was_active {
        tracing::debug!(
            connection_id = %session.connection_id,
            user_id = %session.user_id,
            "displaced connection closed; presence unchanged"
        );
        return;
    }

    release_presence(state, &session.user_id);
}

/// Take `user_id` offline after its active connection was unregistered. A
/// connection registered in the meantime keeps the user online.
pub fn release_presence(state: &AppState, user_id: &str) {
    let released = state
        .presence
        .set_offline_unless(user_id, || state.connections.active_connection(user_id).is_some());
    match released {
        Some(record) => {
            state.messaging.clear_typing(user_id);
            state.bus.publish(DomainEvent::PresenceChanged(record));
        }
        None => tracing::debug!(%user_id, "user reconnected before disconnect settled; presence unchanged"),
    }
}
