//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parkspot_common::protocol::{
    ClientMessage, GatewayMessage, HeartbeatPayload, IdentifyPayload, OP_DISPATCH, OP_HEARTBEAT,
    OP_IDENTIFY,
};
use tokio::sync::{broadcast, watch};
use tokio::time;

use crate::AppState;

use super::fanout::Envelope;
use super::handler::{handle_disconnect, handle_dispatch, handle_identify, HEARTBEAT_INTERVAL_MS};
use super::session::GatewaySession;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_DECODE_ERROR: u16 = 4002;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_ALREADY_AUTHENTICATED: u16 = 4005;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;
const CLOSE_GOING_AWAY: u16 = 1001;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: wait for IDENTIFY within the timeout.
    let identify = time::timeout(
        Duration::from_secs(IDENTIFY_TIMEOUT_SECS),
        read_identify(&mut ws_rx),
    )
    .await;

    let payload = match identify {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(%reason, "initial handshake failed");
            let _ = send_close(&mut ws_tx, code, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Subscribe before anything is announced so events published right after
    // READY are not missed.
    let broadcast_rx = state.router.subscribe();
    let shutdown_rx = state.router.shutdown_signal();

    let (session, ready_msg) = match handle_identify(&state, payload).await {
        Ok(result) => result,
        Err(reason) => {
            tracing::debug!(%reason, "identify handler failed");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
    };

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway session established"
    );

    if send_json(&mut ws_tx, &ready_msg).await.is_ok() {
        run_session(&state, &session, ws_tx, ws_rx, broadcast_rx, shutdown_rx).await;
    }

    handle_disconnect(&state, &session);

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

async fn read_identify(ws_rx: &mut WsStream) -> Result<IdentifyPayload, (u16, &'static str)> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => return Err((CLOSE_UNKNOWN_ERROR, "client closed")),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "ws read error during identify");
                return Err((CLOSE_UNKNOWN_ERROR, "read error"));
            }
        };

        let client_msg: ClientMessage = serde_json::from_str(&text)
            .map_err(|_| (CLOSE_DECODE_ERROR, "Invalid JSON"))?;

        if client_msg.op != OP_IDENTIFY {
            return Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY"));
        }
        return serde_json::from_value(client_msg.d)
            .map_err(|_| (CLOSE_DECODE_ERROR, "invalid identify payload"));
    }
    Err((CLOSE_UNKNOWN_ERROR, "connection closed before identify"))
}

/// Main session event loop: read client messages, forward routed events,
/// enforce heartbeat, and stop on shutdown.
async fn run_session(
    state: &AppState,
    session: &GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut broadcast_rx: broadcast::Receiver<Arc<Envelope>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => {
                        let _ = send_close(&mut ws_tx, CLOSE_DECODE_ERROR, "Invalid JSON").await;
                        break;
                    }
                };

                match client_msg.op {
                    OP_HEARTBEAT => {
                        got_heartbeat = true;
                        state.presence.touch(&session.user_id);
                        let payload: HeartbeatPayload =
                            serde_json::from_value(client_msg.d).unwrap_or_default();
                        if send_json(&mut ws_tx, &GatewayMessage::heartbeat_ack(payload.seq)).await.is_err() {
                            break;
                        }
                    }
                    OP_DISPATCH => {
                        let event = match client_msg.event() {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::debug!(
                                    connection_id = %session.connection_id,
                                    t = ?client_msg.t,
                                    %e,
                                    "undecodable client dispatch"
                                );
                                let _ = send_close(&mut ws_tx, CLOSE_DECODE_ERROR, "Invalid dispatch").await;
                                break;
                            }
                        };
                        if let Err(err) = handle_dispatch(state, session, event).await {
                            tracing::debug!(
                                connection_id = %session.connection_id,
                                user_id = %session.user_id,
                                %err,
                                "client dispatch rejected"
                            );
                        }
                    }
                    OP_IDENTIFY => {
                        let _ = send_close(&mut ws_tx, CLOSE_ALREADY_AUTHENTICATED, "Already identified").await;
                        break;
                    }
                    _ => {
                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                        break;
                    }
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(envelope) => {
                        if !state.router.should_deliver(&session.connection_id, &envelope) {
                            continue;
                        }
                        let msg = match GatewayMessage::dispatch(&envelope.event, session.next_seq()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                tracing::error!(event = envelope.event.name(), %e, "failed to encode dispatch");
                                continue;
                            }
                        };
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway session lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = send_json(&mut ws_tx, &GatewayMessage::reconnect("server shutting down")).await;
                    let _ = send_close(&mut ws_tx, CLOSE_GOING_AWAY, "Server shutting down").await;
                    break;
                }
            }
        }
    }
}

async fn send_json(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
