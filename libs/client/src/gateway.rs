//! WebSocket client for the booking gateway.
//!
//! [`GatewayClient::run`] owns the connection loop: connect, IDENTIFY, wait
//! for READY, re-join every remembered topic, then pump frames until the
//! socket drops. Drops go through the [`ReconnectMachine`]; inbound
//! dispatches are broadcast to subscribers and folded into the
//! [`NotificationCenter`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parkspot_common::protocol::{
    AvailabilityChange, ClientEvent, ClientMessage, GatewayMessage, IdentifyPayload,
    ReadyPayload, SendMessagePayload, ServerEvent, TopicRef, TypingSignal, OP_DISPATCH,
    OP_HEARTBEAT_ACK, OP_RECONNECT,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::notification::{Notification, NotificationCenter};
use crate::reconnect::{ConnectionState, InvalidTransition, ReconnectMachine, ReconnectPolicy};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `ws://localhost:4000/gateway`
    pub url: String,
    pub identity: IdentifyPayload,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, identity: IdentifyPayload) -> Self {
        Self {
            url: url.into(),
            identity,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("server closed the connection (code {0:?})")]
    Closed(Option<u16>),

    #[error("server requested a reconnect")]
    ReconnectRequested,

    #[error("no READY within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("disconnected after {0} failed attempts")]
    Exhausted(u32),

    #[error("client is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

pub struct GatewayClient {
    config: ClientConfig,
    topics: Mutex<BTreeSet<String>>,
    notifications: Arc<Mutex<NotificationCenter>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ServerEvent>,
    commands: mpsc::UnboundedSender<ClientEvent>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    shutdown: watch::Sender<bool>,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            topics: Mutex::new(BTreeSet::new()),
            notifications: Arc::new(Mutex::new(NotificationCenter::new())),
            state,
            events,
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            shutdown,
        }
    }

    pub fn notifications(&self) -> Arc<Mutex<NotificationCenter>> {
        self.notifications.clone()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Every dispatch received after subscribing, READY excluded.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Topics re-joined on every (re)connect.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    pub fn join_topic(&self, spot_id: impl Into<String>) {
        let spot_id = spot_id.into();
        self.topics.lock().insert(spot_id.clone());
        self.queue(ClientEvent::JoinTopic(TopicRef { spot_id }));
    }

    pub fn leave_topic(&self, spot_id: &str) {
        self.topics.lock().remove(spot_id);
        self.queue(ClientEvent::LeaveTopic(TopicRef {
            spot_id: spot_id.to_string(),
        }));
    }

    pub fn send_message(&self, recipient_id: impl Into<String>, message: impl Into<String>) {
        self.queue(ClientEvent::SendMessage(SendMessagePayload {
            recipient_id: recipient_id.into(),
            message: message.into(),
            sender_id: None,
            sender_name: None,
        }));
    }

    pub fn set_typing(&self, recipient_id: impl Into<String>, typing: bool) {
        let signal = TypingSignal {
            recipient_id: recipient_id.into(),
            sender_id: None,
        };
        self.queue(if typing {
            ClientEvent::TypingStart(signal)
        } else {
            ClientEvent::TypingStop(signal)
        });
    }

    pub fn change_availability(
        &self,
        spot_id: impl Into<String>,
        available: bool,
        reason: Option<String>,
    ) {
        self.queue(ClientEvent::SpotAvailabilityChange(AvailabilityChange {
            spot_id: spot_id.into(),
            available,
            reason,
        }));
    }

    /// Ask [`run`](Self::run) to close the socket and return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Drive the connection until [`shutdown`](Self::shutdown) is called or
    /// the retry budget is spent.
    pub async fn run(&self) -> Result<(), ClientError> {
        let mut commands = self
            .command_rx
            .lock()
            .take()
            .ok_or(ClientError::AlreadyRunning)?;
        let mut shutdown = self.shutdown.subscribe();
        let mut machine = ReconnectMachine::new(self.config.reconnect);
        self.publish_state(machine.start()?);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let err = match self.session(&mut machine, &mut commands, &mut shutdown).await {
                Ok(()) => break,
                Err(err) => err,
            };
            tracing::warn!(url = %self.config.url, error = %err, "gateway connection lost");

            let state = machine.failed(&mut rand::thread_rng())?;
            self.publish_state(state);
            let ConnectionState::Backoff { attempt, delay } = state else {
                tracing::error!(
                    attempts = self.config.reconnect.max_attempts,
                    "giving up on gateway"
                );
                return Err(ClientError::Exhausted(self.config.reconnect.max_attempts));
            };

            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            self.publish_state(machine.retry()?);
        }

        machine.close();
        self.publish_state(machine.state());
        Ok(())
    }

    /// One connection lifetime. `Ok` only on requested shutdown.
    async fn session(
        &self,
        machine: &mut ReconnectMachine,
        commands: &mut mpsc::UnboundedReceiver<ClientEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.config.url.as_str()).await?;
        send(&mut ws, &ClientMessage::identify(&self.config.identity)?).await?;

        let ready = time::timeout(HANDSHAKE_TIMEOUT, wait_ready(&mut ws))
            .await
            .map_err(|_| ClientError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;
        self.publish_state(machine.connected()?);
        tracing::info!(
            connection_id = %ready.connection_id,
            user_id = %ready.user_id,
            "gateway ready"
        );

        for spot_id in self.topics() {
            let event = ClientEvent::JoinTopic(TopicRef { spot_id });
            send(&mut ws, &ClientMessage::dispatch(&event)?).await?;
        }

        let mut heartbeat = time::interval(Duration::from_millis(ready.heartbeat_interval.max(1)));
        heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut seq = 0u64;

        loop {
            tokio::select! {
                frame = ws.next() => {
                    let Some(frame) = frame else {
                        return Err(ClientError::Closed(None));
                    };
                    match frame? {
                        Message::Text(text) => self.handle_frame(text.as_str())?,
                        Message::Close(close) => {
                            return Err(ClientError::Closed(close.map(|c| u16::from(c.code))));
                        }
                        _ => {}
                    }
                }

                Some(event) = commands.recv() => {
                    send(&mut ws, &ClientMessage::dispatch(&event)?).await?;
                }

                _ = heartbeat.tick() => {
                    seq += 1;
                    send(&mut ws, &ClientMessage::heartbeat(seq)).await?;
                }

                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) -> Result<(), ClientError> {
        let msg: GatewayMessage = serde_json::from_str(text)?;
        match msg.op {
            OP_DISPATCH => match msg.event() {
                Some(Ok(event)) => self.deliver(event),
                Some(Err(e)) => {
                    tracing::debug!(t = ?msg.t, error = %e, "skipping undecodable dispatch")
                }
                None => {}
            },
            OP_RECONNECT => return Err(ClientError::ReconnectRequested),
            OP_HEARTBEAT_ACK => tracing::trace!("heartbeat acknowledged"),
            op => tracing::debug!(op, "ignoring unknown opcode"),
        }
        Ok(())
    }

    fn deliver(&self, event: ServerEvent) {
        if let Some(notification) = Notification::from_event(&event) {
            self.notifications.lock().push(notification);
        }
        let _ = self.events.send(event);
    }

    fn queue(&self, event: ClientEvent) {
        // The receiver lives as long as `self`, so this only fails after the
        // receiver was taken by a finished `run`.
        if self.commands.send(event).is_err() {
            tracing::debug!("gateway client no longer running; command dropped");
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn send(ws: &mut Ws, msg: &ClientMessage) -> Result<(), ClientError> {
    let text = serde_json::to_string(msg)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn wait_ready(ws: &mut Ws) -> Result<ReadyPayload, ClientError> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => {
                let msg: GatewayMessage = serde_json::from_str(text.as_str())?;
                if let Some(ServerEvent::Ready(ready)) = msg.event().transpose()? {
                    return Ok(ready);
                }
            }
            Message::Close(close) => {
                return Err(ClientError::Closed(close.map(|c| u16::from(c.code))));
            }
            _ => {}
        }
    }
    Err(ClientError::Closed(None))
}
