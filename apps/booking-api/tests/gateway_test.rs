mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parkspot_common::protocol::{
    AvailabilityChange, ClientEvent, ClientMessage, IdentifyPayload, SendMessagePayload, TopicRef,
    TypingSignal,
};
use serde_json::Value;
use tokio::time;
use tokio_tungstenite::tungstenite;

use booking_api::bus::DomainEvent;
use booking_api::AppState;

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start an actual TCP server for WebSocket testing.
async fn start_ws_server() -> (SocketAddr, AppState) {
    start_ws_server_with(|_| {}).await
}

async fn start_ws_server_with(
    configure: impl FnOnce(&mut booking_api::config::Config),
) -> (SocketAddr, AppState) {
    let state = common::test_state_with(configure).await;
    state.spawn_background_tasks();
    let app = booking_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    ws.send(tungstenite::Message::Text(serde_json::to_string(msg).unwrap().into()))
        .await
        .expect("ws send");
}

async fn dispatch(ws: &mut Ws, event: ClientEvent) {
    send(ws, &ClientMessage::dispatch(&event).unwrap()).await;
}

/// Connect, IDENTIFY as `uid`, and wait for READY.
async fn connect_and_identify(addr: SocketAddr, uid: &str) -> (Ws, Value) {
    let url = format!("ws://{addr}/gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let identify = IdentifyPayload {
        uid: uid.to_string(),
        username: format!("{uid}-name"),
        email: None,
    };
    send(&mut ws, &ClientMessage::identify(&identify).unwrap()).await;

    let ready = next_dispatch(&mut ws, "READY").await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["s"], 1);
    (ws, ready)
}

/// Read frames until one matches `pred`, failing after two seconds.
async fn next_frame(ws: &mut Ws, mut pred: impl FnMut(&Value) -> bool) -> Value {
    time::timeout(Duration::from_secs(2), async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("stream ended")
                .expect("ws read error");
            let Ok(text) = msg.into_text() else { continue };
            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if pred(&frame) {
                return frame;
            }
        }
    })
    .await
    .expect("timeout waiting for frame")
}

async fn next_dispatch(ws: &mut Ws, name: &str) -> Value {
    next_frame(ws, |f| f["op"] == 0 && f["t"] == name).await
}

/// Count dispatches named `name` arriving within `window`.
async fn count_dispatches(ws: &mut Ws, name: &str, window: Duration) -> usize {
    let mut count = 0;
    let deadline = time::Instant::now() + window;
    while let Ok(Some(Ok(msg))) = time::timeout_at(deadline, ws.next()).await {
        let Ok(text) = msg.into_text() else { continue };
        if let Ok(frame) = serde_json::from_str::<Value>(&text) {
            if frame["t"] == name {
                count += 1;
            }
        }
    }
    count
}

async fn join(ws: &mut Ws, spot_id: &str) {
    dispatch(
        ws,
        ClientEvent::JoinTopic(TopicRef {
            spot_id: spot_id.to_string(),
        }),
    )
    .await;
    let joined = next_dispatch(ws, "TOPIC_JOINED").await;
    assert_eq!(joined["d"]["spotId"], spot_id);
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_returns_ready() {
    let (addr, state) = start_ws_server().await;
    let (_ws, ready) = connect_and_identify(addr, "user_1").await;

    let d = &ready["d"];
    assert!(d["connectionId"].as_str().unwrap().starts_with("conn_"));
    assert_eq!(d["userId"], "user_1");
    assert!(d["heartbeatInterval"].as_u64().unwrap() > 0);
    assert!(state.presence.is_online("user_1"));
}

#[tokio::test]
async fn dispatch_before_identify_closes_connection() {
    let (addr, _state) = start_ws_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/gateway"))
        .await
        .expect("ws connect");

    send(&mut ws, &ClientMessage::heartbeat(1)).await;

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("read error");
    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(4003)
            );
        }
        tungstenite::Message::Close(None) => {}
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}

#[tokio::test]
async fn heartbeat_returns_ack() {
    let (addr, _state) = start_ws_server().await;
    let (mut ws, _) = connect_and_identify(addr, "user_1").await;

    send(&mut ws, &ClientMessage::heartbeat(7)).await;
    let ack = next_frame(&mut ws, |f| f["op"] == 6).await;
    assert_eq!(ack["d"]["ack"], 7);
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn topic_events_reach_only_joined_clients() {
    let (addr, state) = start_ws_server().await;
    let (mut client_a, _) = connect_and_identify(addr, "client_a").await;
    let (mut client_b, _) = connect_and_identify(addr, "client_b").await;

    join(&mut client_a, "spot_9").await;

    state.bus.publish(DomainEvent::AvailabilityChanged {
        spot_id: "spot_9".to_string(),
        available: false,
        reason: "maintenance".to_string(),
        changed_by: "owner_9".to_string(),
    });

    let window = Duration::from_millis(400);
    assert_eq!(count_dispatches(&mut client_a, "SPOT_AVAILABILITY_UPDATED", window).await, 1);
    assert_eq!(count_dispatches(&mut client_b, "SPOT_AVAILABILITY_UPDATED", window).await, 0);
}

#[tokio::test]
async fn left_topic_stops_receiving() {
    let (addr, state) = start_ws_server().await;
    let (mut ws, _) = connect_and_identify(addr, "client_a").await;
    join(&mut ws, "spot_9").await;

    dispatch(
        &mut ws,
        ClientEvent::LeaveTopic(TopicRef {
            spot_id: "spot_9".to_string(),
        }),
    )
    .await;
    next_dispatch(&mut ws, "TOPIC_LEFT").await;

    state.bus.publish(DomainEvent::AvailabilityChanged {
        spot_id: "spot_9".to_string(),
        available: true,
        reason: "reopened".to_string(),
        changed_by: "owner_9".to_string(),
    });
    assert_eq!(
        count_dispatches(&mut ws, "SPOT_AVAILABILITY_UPDATED", Duration::from_millis(300)).await,
        0
    );
}

#[tokio::test]
async fn only_the_owner_can_relay_availability() {
    let (addr, _state) = start_ws_server().await;
    let (mut watcher, _) = connect_and_identify(addr, "watcher").await;
    let (mut owner, _) = connect_and_identify(addr, "owner_9").await;
    let (mut stranger, _) = connect_and_identify(addr, "stranger").await;
    join(&mut watcher, "spot_9").await;

    let change = |available| {
        ClientEvent::SpotAvailabilityChange(AvailabilityChange {
            spot_id: "spot_9".to_string(),
            available,
            reason: Some("manual".to_string()),
        })
    };

    dispatch(&mut stranger, change(false)).await;
    assert_eq!(
        count_dispatches(&mut watcher, "SPOT_AVAILABILITY_UPDATED", Duration::from_millis(300)).await,
        0
    );

    dispatch(&mut owner, change(false)).await;
    let update = next_dispatch(&mut watcher, "SPOT_AVAILABILITY_UPDATED").await;
    assert_eq!(update["d"]["available"], false);
    assert_eq!(update["d"]["reason"], "manual");
}

#[tokio::test]
async fn confirmed_booking_notifies_owner_booker_and_topic() {
    let (addr, state) = start_ws_server().await;
    let (mut owner, _) = connect_and_identify(addr, "owner_1").await;
    let (mut booker, _) = connect_and_identify(addr, "user_1").await;
    let (mut watcher, _) = connect_and_identify(addr, "watcher").await;
    join(&mut watcher, "spot_1").await;

    let body = common::checkout_event("sess_ws", None, "spot_1");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/webhooks/payments"))
        .header(booking_api::auth::signature::SIGNATURE_HEADER, common::sign(&body))
        .body(body)
        .send()
        .await
        .expect("webhook request");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let received = next_dispatch(&mut owner, "BOOKING_RECEIVED").await;
    assert_eq!(received["d"]["booking"]["sessionId"], "sess_ws");
    next_dispatch(&mut booker, "BOOKING_CONFIRMED").await;
    next_dispatch(&mut watcher, "SPOT_BOOKED").await;
    let update = next_dispatch(&mut watcher, "SPOT_AVAILABILITY_UPDATED").await;
    assert_eq!(update["d"]["reason"], "booked");
    assert_eq!(update["d"]["available"], false);

    assert_eq!(state.store.booking_count().await, 1);
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_follows_the_latest_connection() {
    let (addr, state) = start_ws_server().await;
    let (first, _) = connect_and_identify(addr, "user_1").await;
    let (second, _) = connect_and_identify(addr, "user_1").await;

    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.presence.is_online("user_1"), "displaced close must not go offline");

    drop(second);
    assert!(common::eventually(|| !state.presence.is_online("user_1")).await);

    let record = reqwest::get(format!("http://{addr}/api/v1/presence/user_1"))
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(record["online"], false);
}

#[tokio::test]
async fn presence_changes_are_broadcast() {
    let (addr, _state) = start_ws_server().await;
    let (mut observer, _) = connect_and_identify(addr, "observer").await;

    let (other, _) = connect_and_identify(addr, "user_1").await;
    let online = next_frame(&mut observer, |f| {
        f["t"] == "PRESENCE_UPDATE" && f["d"]["userId"] == "user_1"
    })
    .await;
    assert_eq!(online["d"]["online"], true);

    drop(other);
    let offline = next_frame(&mut observer, |f| {
        f["t"] == "PRESENCE_UPDATE" && f["d"]["userId"] == "user_1" && f["d"]["online"] == false
    })
    .await;
    assert!(offline["d"]["lastSeen"].is_string());
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

fn chat(recipient_id: &str, message: &str) -> ClientEvent {
    ClientEvent::SendMessage(SendMessagePayload {
        recipient_id: recipient_id.to_string(),
        message: message.to_string(),
        sender_id: Some("someone_else".to_string()),
        sender_name: None,
    })
}

#[tokio::test]
async fn message_reaches_recipient_with_authenticated_sender() {
    let (addr, _state) = start_ws_server().await;
    let (mut alice, _) = connect_and_identify(addr, "alice").await;
    let (mut bob, _) = connect_and_identify(addr, "bob").await;

    dispatch(&mut alice, chat("bob", "is the spot free?")).await;

    let msg = next_dispatch(&mut bob, "NEW_MESSAGE").await;
    assert_eq!(msg["d"]["senderId"], "alice");
    assert_eq!(msg["d"]["senderName"], "alice-name");
    assert_eq!(msg["d"]["conversationId"], "5:alice:bob");
    assert_eq!(msg["d"]["text"], "is the spot free?");

    let ack = next_dispatch(&mut alice, "MESSAGE_SENT").await;
    assert_eq!(ack["d"]["delivered"], true);
}

#[tokio::test]
async fn message_to_offline_user_is_acknowledged_undelivered() {
    let (addr, _state) = start_ws_server().await;
    let (mut alice, _) = connect_and_identify(addr, "alice").await;

    dispatch(&mut alice, chat("nobody", "hello?")).await;
    let ack = next_dispatch(&mut alice, "MESSAGE_SENT").await;
    assert_eq!(ack["d"]["delivered"], false);
}

#[tokio::test]
async fn typing_indicator_expires() {
    let (addr, _state) =
        start_ws_server_with(|config| config.typing_timeout = Duration::from_millis(300)).await;
    let (mut alice, _) = connect_and_identify(addr, "alice").await;
    let (mut bob, _) = connect_and_identify(addr, "bob").await;

    dispatch(
        &mut alice,
        ClientEvent::TypingStart(TypingSignal {
            recipient_id: "bob".to_string(),
            sender_id: None,
        }),
    )
    .await;

    let started = next_dispatch(&mut bob, "USER_TYPING").await;
    assert_eq!(started["d"]["senderId"], "alice");
    assert_eq!(started["d"]["typing"], true);

    // The sweeper runs every second, inside the two second frame timeout.
    let stopped = next_frame(&mut bob, |f| f["t"] == "USER_TYPING" && f["d"]["typing"] == false).await;
    assert_eq!(stopped["d"]["senderId"], "alice");
}

#[tokio::test]
async fn shutdown_asks_clients_to_reconnect() {
    let (addr, state) = start_ws_server().await;
    let (mut ws, _) = connect_and_identify(addr, "user_1").await;

    state.shutdown().await.unwrap();
    let reconnect = next_frame(&mut ws, |f| f["op"] == 7).await;
    assert!(reconnect["d"]["reason"].is_string());
}

#[tokio::test]
async fn reconnect_during_disconnect_keeps_user_online() {
    use booking_api::gateway::handler::{handle_identify, release_presence};

    let state = common::test_state().await;
    let identify = || IdentifyPayload {
        uid: "user_1".to_string(),
        username: "Ada".to_string(),
        email: None,
    };

    let (first, _) = handle_identify(&state, identify()).await.expect("identify first");
    // The old socket is unregistered, then a new one identifies before the
    // old disconnect gets to presence.
    let gone = state.connections.unregister(&first.connection_id).expect("registered");
    assert!(gone.was_active);
    let (second, _) = handle_identify(&state, identify()).await.expect("identify second");
    release_presence(&state, "user_1");

    assert!(state.presence.is_online("user_1"));
    assert_eq!(
        state.connections.active_connection("user_1"),
        Some(second.connection_id.clone())
    );

    state.connections.unregister(&second.connection_id);
    release_presence(&state, "user_1");
    assert!(!state.presence.is_online("user_1"));
}
