use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use relay_core::protocol::{
    local_player_name, script_name, tellraw_command, Frame, Incoming, EVENT_SCRIPT_LOADED,
    LOCAL_PLAYER_NAME_COMMAND,
};
use relay_core::{ConnectionId, RelayError, RequestId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::dispatcher::log_result;
use crate::lifecycle::ConnectionLifecycle;
use crate::session::{ReplyReceiver, SessionHandle};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);
/// Unanswered requests whose receiver is gone are kept this long so a late
/// reply can still be logged against its command.
const ABANDONED_REPLY_RETENTION: Duration = Duration::from_secs(60);

/// Per-connection transport settings.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub max_send_queue: usize,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_send_queue: 256,
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
        }
    }
}

struct PendingCommand {
    command: String,
    issued: Instant,
    reply: oneshot::Sender<Value>,
}

/// What happened to an incoming reply.
#[derive(Debug, PartialEq)]
pub enum Resolution {
    Delivered,
    /// The waiting attempt already gave up.
    Late { command: String, body: Value },
    Unknown,
}

/// Game client connected over WebSocket.
pub struct WsSession {
    connection_id: ConnectionId,
    player: OnceLock<String>,
    tx: mpsc::Sender<String>,
    pending: DashMap<RequestId, PendingCommand>,
    created: Instant,
    /// Milliseconds after `created` when the client last sent anything.
    last_seen_ms: AtomicU64,
}

impl WsSession {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            player: OnceLock::new(),
            tx,
            pending: DashMap::new(),
            created: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Note that the client just sent a frame or a pong.
    pub fn record_activity(&self) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last) < timeout
    }

    /// Player name once the handshake finished.
    pub fn player(&self) -> &str {
        self.player.get().map(String::as_str).unwrap_or("<handshake>")
    }

    fn enqueue(&self, frame: &Frame) -> Result<(), RelayError> {
        let text = frame.to_text()?;
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => RelayError::SessionClosed,
        })
    }

    fn prune_abandoned(&self) {
        self.pending.retain(|_, p| {
            !(p.reply.is_closed() && p.issued.elapsed() > ABANDONED_REPLY_RETENTION)
        });
    }

    /// Hand a reply to whoever is waiting for `request_id`.
    pub fn resolve(&self, request_id: RequestId, body: Value) -> Resolution {
        let Some((_, pending)) = self.pending.remove(&request_id) else {
            return Resolution::Unknown;
        };
        match pending.reply.send(body) {
            Ok(()) => Resolution::Delivered,
            Err(body) => Resolution::Late {
                command: pending.command,
                body,
            },
        }
    }

    /// Drop every outstanding reply channel; their receivers see `Err`.
    pub fn close(&self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl SessionHandle for WsSession {
    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn send_command(&self, command: &str) -> Result<ReplyReceiver, RelayError> {
        self.prune_abandoned();

        let request_id = RequestId::new();
        let (reply, rx) = oneshot::channel();
        // Registered before sending so a fast reply always finds its entry.
        self.pending.insert(
            request_id,
            PendingCommand {
                command: command.to_string(),
                issued: Instant::now(),
                reply,
            },
        );
        if let Err(e) = self.enqueue(&Frame::command(request_id, command)) {
            self.pending.remove(&request_id);
            return Err(e);
        }

        tracing::debug!(player = self.player(), request_id = %request_id, command, "Sent command");
        Ok(rx)
    }

    fn send_message(&self, message: &str) -> Result<(), RelayError> {
        self.enqueue(&Frame::command(RequestId::new(), &tellraw_command(message)))
    }

    fn subscribe(&self, event_name: &str) -> Result<(), RelayError> {
        self.enqueue(&Frame::subscribe(RequestId::new(), event_name))
    }
}

/// Route one incoming text frame.
fn route_frame(session: &WsSession, raw: &str) {
    let frame = match Frame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(connection_id = %session.connection_id, error = %e, "Ignoring unparseable frame");
            return;
        }
    };

    match frame.classify() {
        Incoming::Reply { request_id, body } => match session.resolve(request_id, body) {
            Resolution::Delivered => {}
            Resolution::Late { command, body } => {
                log_result(session.player(), &command, &body);
                tracing::debug!(player = session.player(), request_id = %request_id, "Result arrived after its attempt ended");
            }
            Resolution::Unknown => {
                tracing::debug!(player = session.player(), request_id = %request_id, "Reply for unknown request");
            }
        },
        Incoming::Event { name, body } if name == EVENT_SCRIPT_LOADED => {
            let script = script_name(&body).unwrap_or("<unknown>");
            tracing::info!(player = session.player(), "Loaded Script: {script}");
        }
        Incoming::Event { name, .. } => {
            tracing::trace!(player = session.player(), event = %name, "Ignoring event");
        }
        Incoming::Other { purpose } => {
            tracing::trace!(player = session.player(), purpose = %purpose, "Ignoring frame");
        }
    }
}

/// Ask the client for its player name.
async fn handshake(session: &WsSession, timeout: Duration) -> Result<String, RelayError> {
    let reply = session.send_command(LOCAL_PLAYER_NAME_COMMAND)?;
    let body = match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(body)) => body,
        Ok(Err(_)) => return Err(RelayError::SessionClosed),
        Err(_) => {
            return Err(RelayError::Handshake(format!(
                "no player name within {timeout:?}"
            )))
        }
    };
    local_player_name(&body)
        .map(str::to_string)
        .ok_or_else(|| RelayError::Handshake("reply carried no player name".into()))
}

/// Resolve once the client has been silent for `timeout`, checking every
/// `check_every`.
async fn watch_liveness(session: &WsSession, check_every: Duration, timeout: Duration) {
    let mut ticks = tokio::time::interval(check_every);
    ticks.tick().await;
    loop {
        ticks.tick().await;
        if !session.is_alive(timeout) {
            return;
        }
    }
}

/// Drive one game-client WebSocket: writer + reader tasks, handshake, then
/// register until either side ends or the client goes silent.
pub async fn handle_ws_connection(
    socket: WebSocket,
    lifecycle: ConnectionLifecycle,
    config: TransportConfig,
) {
    let (tx, mut rx) = mpsc::channel::<String>(config.max_send_queue);
    let session = Arc::new(WsSession::new(tx));
    let connection_id = session.connection_id.clone();
    tracing::debug!(connection_id = %connection_id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued frames to the socket + periodic ping
    let writer_cid = connection_id.clone();
    let heartbeat_interval = config.heartbeat_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
            }
        }
    });

    // Reader task: route replies and events, track liveness
    let reader_session = Arc::clone(&session);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_session.record_activity();
                    route_frame(&reader_session, text.as_str());
                }
                WsMessage::Pong(_) => reader_session.record_activity(),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pings itself
                _ => {}
            }
        }
        reader_session.close();
    });

    let name = match handshake(&session, config.handshake_timeout).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Handshake failed, closing connection");
            writer.abort();
            reader.abort();
            session.close();
            return;
        }
    };
    let _ = session.player.set(name.clone());
    lifecycle.on_connect(&name, session.clone());

    tokio::select! {
        _ = &mut writer => {},
        _ = &mut reader => {},
        _ = watch_liveness(&session, heartbeat_interval, config.client_timeout) => {
            tracing::warn!(player = %name, connection_id = %connection_id, "Client stopped responding, dropping connection");
        }
    }
    writer.abort();
    reader.abort();
    session.close();
    lifecycle.on_disconnect(&name, &connection_id);
}
