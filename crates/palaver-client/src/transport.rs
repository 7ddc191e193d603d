//! Socket transport with automatic reconnection.
//!
//! The transport owns one connection task for the lifetime of the client.
//! The task dials through a [`SocketConnector`], authenticates, replays
//! room-channel joins, then pumps events both ways until the socket drops,
//! at which point it backs off linearly and redials. Consumers never see
//! the reconnect cycle directly; they observe it as a
//! [`ConnectionState`] transition on the state watch.
//!
//! Inbound events fan out on per-kind broadcast channels, so a subscriber
//! interested only in typing indicators is never woken for messages. The
//! session instead takes the combined stream, which preserves delivery
//! order across kinds.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use palaver_core::{SyncConfig, SyncError};
use palaver_proto::{EventKind, RoomId, WireEvent};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

/// Capacity of each per-kind broadcast channel. Slow subscribers lag
/// rather than block the connection task.
const FANOUT_CAPACITY: usize = 256;

/// Capacity of the outbound event queue.
const OUTBOUND_CAPACITY: usize = 64;

/// Errors from the socket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the server failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The socket dropped mid-operation.
    #[error("connection closed")]
    Closed,

    /// A send failed before the socket noticed it was dead.
    #[error("send failed: {0}")]
    Send(String),
}

/// A bidirectional event socket.
///
/// `recv` returning `None` means the peer closed the connection; the
/// transport responds by redialing.
#[async_trait]
pub trait Socket: Send {
    /// Send one event to the server.
    async fn send(&mut self, event: WireEvent) -> Result<(), TransportError>;

    /// Receive the next event, or `None` on close.
    async fn recv(&mut self) -> Option<WireEvent>;
}

/// Dials sockets. Implemented over websockets in production and over
/// in-memory channel pairs in tests.
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    /// Establish a fresh socket to the server.
    async fn connect(&self) -> Result<Box<dyn Socket>, TransportError>;
}

/// Observable connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing or authenticating.
    Connecting,
    /// Authenticated and pumping events.
    Connected,
    /// Socket lost; a reconnect attempt is pending.
    Disconnected,
    /// Gave up: retries exhausted or the handshake was rejected.
    Failed,
}

/// Broadcast routing for inbound events: one combined channel that keeps
/// delivery order across kinds, plus per-kind channels for narrow
/// subscribers.
struct EventFanout {
    all: broadcast::Sender<WireEvent>,
    by_kind: HashMap<EventKind, broadcast::Sender<WireEvent>>,
}

impl EventFanout {
    fn new() -> Self {
        let by_kind = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, broadcast::channel(FANOUT_CAPACITY).0))
            .collect();
        Self { all: broadcast::channel(FANOUT_CAPACITY).0, by_kind }
    }

    fn publish(&self, event: WireEvent) {
        // No subscribers is fine on either channel.
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.by_kind.get(&event.kind()) {
            let _ = sender.send(event);
        }
    }

    fn subscribe_all(&self) -> broadcast::Receiver<WireEvent> {
        self.all.subscribe()
    }

    fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<WireEvent> {
        match self.by_kind.get(&kind) {
            Some(sender) => sender.subscribe(),
            // Unreachable in practice: the table covers EventKind::ALL.
            None => broadcast::channel(1).0.subscribe(),
        }
    }
}

/// Handle to the connection task.
///
/// Cloneable-by-parts: the session holds the single instance; UI layers
/// get watch receivers and broadcast subscriptions from it.
pub struct TransportClient {
    outbound: mpsc::Sender<WireEvent>,
    /// Shared with the connection task so shutdown can publish a final
    /// transition after the task is gone.
    state: Arc<watch::Sender<ConnectionState>>,
    fanout: Arc<EventFanout>,
    joined: Arc<Mutex<Vec<RoomId>>>,
    task: JoinHandle<()>,
}

impl TransportClient {
    /// Spawn the connection task and return its handle.
    ///
    /// The task dials immediately and keeps the connection alive until
    /// retries are exhausted or the handshake is rejected.
    pub fn spawn(
        connector: Arc<dyn SocketConnector>,
        token: String,
        config: &SyncConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state_tx);
        let fanout = Arc::new(EventFanout::new());
        let joined = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(run_connection(ConnectionTask {
            connector,
            token,
            handshake_timeout: config.handshake_timeout,
            base_delay: config.reconnect_base_delay,
            max_retries: config.reconnect_max_retries,
            outbound: outbound_rx,
            state: Arc::clone(&state),
            fanout: Arc::clone(&fanout),
            joined: Arc::clone(&joined),
        }));

        Self { outbound: outbound_tx, state, fanout, joined, task }
    }

    /// Current connection state, and a watch for transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to every inbound event, in delivery order across kinds.
    pub fn subscribe_all(&self) -> broadcast::Receiver<WireEvent> {
        self.fanout.subscribe_all()
    }

    /// Subscribe to inbound events of one kind.
    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<WireEvent> {
        self.fanout.subscribe(kind)
    }

    /// Send an event to the server.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotConnected`] while the socket is down. Events are not
    /// queued across disconnects; callers decide what is worth retrying.
    pub async fn publish(&self, event: WireEvent) -> Result<(), SyncError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(SyncError::NotConnected);
        }
        self.outbound.send(event).await.map_err(|_| SyncError::NotConnected)
    }

    /// Join a room channel, and re-join it automatically on reconnect.
    ///
    /// Joining while offline is not an error: the join is recorded and
    /// issued when the connection returns.
    pub async fn join_room(&self, room_id: RoomId) -> Result<(), SyncError> {
        {
            let mut joined = self.joined.lock().await;
            if !joined.contains(&room_id) {
                joined.push(room_id.clone());
            }
        }
        match self.publish(WireEvent::Join { room_id }).await {
            Err(SyncError::NotConnected) => Ok(()),
            other => other,
        }
    }

    /// Leave a room channel and stop re-joining it.
    pub async fn leave_room(&self, room_id: RoomId) -> Result<(), SyncError> {
        self.joined.lock().await.retain(|r| r != &room_id);
        match self.publish(WireEvent::Leave { room_id }).await {
            Err(SyncError::NotConnected) => Ok(()),
            other => other,
        }
    }

    /// Stop the connection task and publish the final state transition.
    ///
    /// A terminal [`ConnectionState::Failed`] is kept; otherwise observers
    /// see [`ConnectionState::Disconnected`].
    pub fn shutdown(&self) {
        self.task.abort();
        if *self.state.borrow() != ConnectionState::Failed {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient").field("state", &*self.state.borrow()).finish()
    }
}

/// Everything the connection task owns.
struct ConnectionTask {
    connector: Arc<dyn SocketConnector>,
    token: String,
    handshake_timeout: Duration,
    base_delay: Duration,
    max_retries: u32,
    outbound: mpsc::Receiver<WireEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    fanout: Arc<EventFanout>,
    joined: Arc<Mutex<Vec<RoomId>>>,
}

/// Handshake outcome that decides whether to retry.
enum HandshakeFailure {
    /// Rejected by the server. Fatal: the token is bad, retrying with the
    /// same token cannot succeed.
    Rejected(String),
    /// The socket died mid-handshake. Retryable.
    Lost,
}

async fn run_connection(mut task: ConnectionTask) {
    let mut attempt: u32 = 0;

    loop {
        // `send_replace` stores the state even while nobody watches.
        task.state.send_replace(ConnectionState::Connecting);

        let mut socket = match task.connector.connect().await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, attempt, "connect failed");
                if !backoff(&task, &mut attempt).await {
                    return;
                }
                continue;
            },
        };

        match handshake(socket.as_mut(), &task.token, task.handshake_timeout).await {
            Ok(user) => info!(user = %user, "socket authenticated"),
            Err(HandshakeFailure::Rejected(reason)) => {
                warn!(reason = %reason, "handshake rejected, giving up");
                task.fanout.publish(WireEvent::AuthRejected { reason });
                task.state.send_replace(ConnectionState::Failed);
                return;
            },
            Err(HandshakeFailure::Lost) => {
                warn!(attempt, "socket lost during handshake");
                if !backoff(&task, &mut attempt).await {
                    return;
                }
                continue;
            },
        }

        if !rejoin_rooms(socket.as_mut(), &task.joined).await {
            if !backoff(&task, &mut attempt).await {
                return;
            }
            continue;
        }

        attempt = 0;
        task.state.send_replace(ConnectionState::Connected);

        pump(socket.as_mut(), &mut task.outbound, &task.fanout).await;

        debug!("socket disconnected");
        task.state.send_replace(ConnectionState::Disconnected);
        if !backoff(&task, &mut attempt).await {
            return;
        }
    }
}

/// Authenticate a fresh socket.
async fn handshake(
    socket: &mut dyn Socket,
    token: &str,
    timeout: Duration,
) -> Result<palaver_proto::UserId, HandshakeFailure> {
    if socket.send(WireEvent::Auth { token: token.to_string() }).await.is_err() {
        return Err(HandshakeFailure::Lost);
    }

    let reply = time::timeout(timeout, socket.recv()).await;
    match reply {
        Ok(Some(WireEvent::AuthAck { user })) => Ok(user),
        Ok(Some(WireEvent::AuthRejected { reason })) => Err(HandshakeFailure::Rejected(reason)),
        // Anything else before the ack violates the handshake.
        Ok(Some(_)) | Ok(None) | Err(_) => Err(HandshakeFailure::Lost),
    }
}

/// Re-issue channel joins after a (re)connect. Returns `false` when the
/// socket died mid-replay.
async fn rejoin_rooms(socket: &mut dyn Socket, joined: &Mutex<Vec<RoomId>>) -> bool {
    let rooms: Vec<RoomId> = joined.lock().await.clone();
    for room_id in rooms {
        debug!(room = %room_id, "rejoining room channel");
        if socket.send(WireEvent::Join { room_id }).await.is_err() {
            return false;
        }
    }
    true
}

/// Pump events both ways until the socket drops.
async fn pump(
    socket: &mut dyn Socket,
    outbound: &mut mpsc::Receiver<WireEvent>,
    fanout: &EventFanout,
) {
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(event) => {
                    if socket.send(event).await.is_err() {
                        return;
                    }
                },
                // All senders dropped: the client is gone.
                None => return,
            },
            inbound = socket.recv() => match inbound {
                Some(event) => fanout.publish(event),
                None => return,
            },
        }
    }
}

/// Linear backoff. Returns `false` once retries are exhausted, after
/// moving the state to [`ConnectionState::Failed`].
async fn backoff(task: &ConnectionTask, attempt: &mut u32) -> bool {
    *attempt += 1;
    if *attempt > task.max_retries {
        warn!(retries = task.max_retries, "reconnect retries exhausted");
        task.state.send_replace(ConnectionState::Failed);
        return false;
    }
    let delay = task.base_delay * *attempt;
    debug!(attempt = *attempt, ?delay, "reconnect backoff");
    time::sleep(delay).await;
    true
}
