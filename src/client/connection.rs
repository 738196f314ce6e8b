//! One authenticated WebSocket connection and its lifecycle.
//!
//! Each connection runs exactly two long-lived tasks: a reader that decodes
//! frames and publishes them to the bus, and a writer that drains the
//! bounded send queue and emits keepalive pings. Both route every exit
//! through one shared, single-shot cleanup.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::error::CapacityError;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message as WsMessage;

use crate::hub::message::{ClientMessage, ErrorMessage, Message};
use crate::hub::{Hub, Room};
use crate::membership::Membership;
use crate::transport::auth::TokenClaims;
use crate::utils::FanoutError;

pub type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

pub(crate) const WRITE_WAIT: Duration = Duration::from_secs(10);
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(60);
pub(crate) const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);
pub(crate) const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MiB
pub(crate) const SEND_QUEUE_CAPACITY: usize = 256;

/// Safety timeout while waiting for the peer to answer a close frame.
const CLOSE_ACK_WAIT: Duration = Duration::from_secs(3);
/// Extra margin on top of the close-acknowledgment deadline.
const CLOSE_ACK_GRACE: Duration = Duration::from_millis(500);
/// Deadline for the best-effort close frame written during cleanup.
const CLEANUP_CLOSE_WAIT: Duration = Duration::from_millis(100);

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Connected = 0,
    Disconnecting = 1,
    Disconnected = 2,
    Error = 3,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnState::Connected as u8))
    }

    /// Transition into `Disconnecting`; only the first caller succeeds.
    fn begin_disconnect(&self) -> bool {
        self.0
            .compare_exchange(
                ConnState::Connected as u8,
                ConnState::Disconnecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn set_disconnected(&self) {
        self.0.store(ConnState::Disconnected as u8, Ordering::SeqCst);
    }

    fn set_error(&self) {
        self.0.store(ConnState::Error as u8, Ordering::SeqCst);
    }

    fn get(&self) -> ConnState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnState::Connected,
            1 => ConnState::Disconnecting,
            2 => ConnState::Disconnected,
            _ => ConnState::Error,
        }
    }
}

/// Per-connection statistics, logged at cleanup.
struct ClientStats {
    messages_received: AtomicI64,
    messages_sent: AtomicI64,
    errors: AtomicI64,
    last_activity_ms: AtomicI64,
    connected_at: std::time::Instant,
}

impl ClientStats {
    fn new() -> Self {
        Self {
            messages_received: AtomicI64::new(0),
            messages_sent: AtomicI64::new(0),
            errors: AtomicI64::new(0),
            last_activity_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            connected_at: std::time::Instant::now(),
        }
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a non-blocking enqueue into the send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Delivered,
    Full,
    Closed,
}

pub struct Client {
    claims: TokenClaims,
    /// Write half of the socket. Cleanup takes it out of the slot so later
    /// writers observe `None`.
    sink: Mutex<Option<WsSink>>,
    /// Sender half of the bounded send queue; dropped by cleanup to close
    /// the queue.
    send_tx: StdMutex<Option<mpsc::Sender<Message>>>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    state: StateCell,
    cancel: CancellationToken,
    stats: ClientStats,
    cleanup_started: AtomicBool,
    close_ack: Notify,
    disconnect_err: StdMutex<Option<FanoutError>>,
}

impl Client {
    /// Build a client from an upgraded socket, join it into its authorized
    /// rooms and launch the reader and writer tasks.
    ///
    /// If the membership query fails the context is cancelled and the
    /// socket is dropped without spawning either task.
    pub async fn connect(
        socket: WsStream,
        claims: TokenClaims,
        hub: &Arc<Hub>,
    ) -> Result<Arc<Self>, FanoutError> {
        let (sink, stream) = socket.split();
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let client = Arc::new(Self {
            claims,
            sink: Mutex::new(Some(sink)),
            send_tx: StdMutex::new(Some(send_tx)),
            rooms: RwLock::new(HashMap::new()),
            state: StateCell::new(),
            cancel: CancellationToken::new(),
            stats: ClientStats::new(),
            cleanup_started: AtomicBool::new(false),
            close_ack: Notify::new(),
            disconnect_err: StdMutex::new(None),
        });

        if let Err(e) = client.join_rooms(hub).await {
            error!(
                "Failed to initialize rooms for user {}: {}",
                client.user_id(),
                e
            );
            client.state.set_error();
            client.cancel.cancel();
            return Err(e);
        }

        client.clone().spawn_read(stream);
        client.clone().spawn_write(send_rx);

        info!("Client {} initialized successfully", client.user_id());
        Ok(client)
    }

    pub fn user_id(&self) -> &str {
        &self.claims.user_id
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// The first error that terminated this connection, if any.
    pub fn disconnect_error(&self) -> Option<String> {
        self.disconnect_err
            .lock()
            .unwrap()
            .as_ref()
            .map(|e| e.to_string())
    }

    /// Unix-millisecond timestamp of the last frame seen on this connection.
    pub fn last_activity_ms(&self) -> i64 {
        self.stats.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Ids of the rooms this client currently participates in.
    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.read().unwrap().keys().cloned().collect()
    }

    async fn join_rooms(self: &Arc<Self>, hub: &Arc<Hub>) -> Result<(), FanoutError> {
        let room_ids = hub.membership().rooms_for_user(self.user_id()).await?;
        for id in room_ids {
            let (room, created) = hub.room(&id);
            room.add_client(self);
            if created {
                debug!("Client {} added to new room {}", self.user_id(), id);
            } else {
                debug!("Client {} added to existing room {}", self.user_id(), id);
            }
        }
        Ok(())
    }

    pub(crate) fn insert_room(&self, room: Arc<Room>) {
        self.rooms
            .write()
            .unwrap()
            .insert(room.id().to_string(), room);
    }

    pub(crate) fn drop_room(&self, id: &str) {
        self.rooms.write().unwrap().remove(id);
    }

    /// Non-blocking enqueue used by the broadcast fan-out.
    pub fn try_enqueue(&self, message: &Message) -> EnqueueOutcome {
        let guard = self.send_tx.lock().unwrap();
        match guard.as_ref() {
            None => EnqueueOutcome::Closed,
            Some(tx) => match tx.try_send(message.clone()) {
                Ok(()) => EnqueueOutcome::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
            },
        }
    }

    // ------------------------------------------------------------------
    // Reader
    // ------------------------------------------------------------------

    fn spawn_read(self: Arc<Self>, stream: WsSource) {
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.read_loop(stream)).catch_unwind().await;
            let err = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    error!(
                        "Panic recovered in read loop for user {}: {}",
                        self.user_id(),
                        detail
                    );
                    Some(FanoutError::Internal(detail))
                }
            };
            self.finish_read(err);
            self.cleanup().await;
        });
    }

    async fn read_loop(&self, mut stream: WsSource) -> Result<(), FanoutError> {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Read loop terminated by cancellation for user {}", self.user_id());
                    return Ok(());
                }
                read = tokio::time::timeout(PONG_WAIT, stream.next()) => match read {
                    Err(_) => return Err(FanoutError::ReadTimeout),
                    Ok(None) => return Err(FanoutError::ConnectionClosed),
                    Ok(Some(Err(e))) => return Err(classify_ws_error(e)),
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            match frame {
                WsMessage::Text(text) => {
                    self.stats.record_received();
                    let msg: ClientMessage = match serde_json::from_str(text.as_str()) {
                        Ok(msg) => msg,
                        Err(e) => {
                            return Err(FanoutError::InvalidMessage {
                                offset: e.column(),
                                detail: e.to_string(),
                            })
                        }
                    };
                    debug!(
                        "Received message from user {} for room {}",
                        self.user_id(),
                        msg.room
                    );
                    self.handle_message(msg).await?;
                }
                WsMessage::Binary(_) => {
                    return Err(FanoutError::InvalidMessage {
                        offset: 0,
                        detail: "binary frames are not supported".to_string(),
                    })
                }
                WsMessage::Close(_) => {
                    // Either the peer hung up or it is acknowledging a close
                    // frame we sent during a graceful shutdown.
                    self.close_ack.notify_one();
                    return Err(FanoutError::ConnectionClosed);
                }
                // Any control frame counts as liveness; the next loop turn
                // re-arms the read deadline.
                WsMessage::Ping(_) | WsMessage::Pong(_) => self.stats.touch(),
                WsMessage::Frame(_) => {}
            }
        }
    }

    /// Resolve the target room in the client's own subscription set, stamp
    /// the sender and publish to the bus.
    ///
    /// An unknown room id is answered with an error frame and the
    /// connection stays open; only transport or bus failures terminate the
    /// reader.
    async fn handle_message(&self, msg: ClientMessage) -> Result<(), FanoutError> {
        let room = { self.rooms.read().unwrap().get(&msg.room).cloned() };
        let Some(room) = room else {
            warn!(
                "Access to room {} denied for user {}",
                msg.room,
                self.user_id()
            );
            let details = format!(
                "You do not have permission to access room {} or it does not exist",
                msg.room
            );
            if let Err(e) = self.send_error_frame("Access Denied", &details).await {
                return Err(FanoutError::RoomAccess(e.to_string()));
            }
            return Ok(());
        };

        let message = Message::from_client(msg, self.user_id().to_string());
        room.publish(&message).await
    }

    /// Write an error frame back to this client; the connection stays open.
    async fn send_error_frame(&self, error: &str, details: &str) -> Result<(), FanoutError> {
        let frame = ErrorMessage {
            error: error.to_string(),
            details: details.to_string(),
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| FanoutError::Internal(format!("error serializing error frame: {e}")))?;
        self.write_frame(WsMessage::text(text)).await
    }

    fn finish_read(&self, err: Option<FanoutError>) {
        match &err {
            None => info!("Read loop terminated for user {}", self.user_id()),
            Some(FanoutError::ConnectionClosed) => {
                info!(
                    "WebSocket connection closed normally for user {}",
                    self.user_id()
                );
            }
            Some(e) => {
                self.stats.record_error();
                warn!(
                    "WebSocket read loop terminated with error for user {}: {}",
                    self.user_id(),
                    e
                );
            }
        }
        if let Some(e) = err {
            self.disconnect_err.lock().unwrap().get_or_insert(e);
        }
    }

    // ------------------------------------------------------------------
    // Writer
    // ------------------------------------------------------------------

    fn spawn_write(self: Arc<Self>, send_rx: mpsc::Receiver<Message>) {
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.write_loop(send_rx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(FanoutError::ConnectionClosed)) => {
                    info!("Connection closed during write for user {}", self.user_id());
                }
                Ok(Err(e)) => {
                    self.stats.record_error();
                    error!("Write loop error for user {}: {}", self.user_id(), e);
                    self.disconnect_err.lock().unwrap().get_or_insert(e);
                }
                Err(panic) => {
                    warn!(
                        "Panic recovered in write loop for user {}: {}",
                        self.user_id(),
                        panic_message(panic.as_ref())
                    );
                }
            }
            info!("Write loop terminated for user {}", self.user_id());
            self.cleanup().await;
        });
    }

    async fn write_loop(&self, mut send_rx: mpsc::Receiver<Message>) -> Result<(), FanoutError> {
        let mut ticker = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Write loop terminated by cancellation for user {}", self.user_id());
                    return Ok(());
                }
                queued = send_rx.recv() => {
                    let Some(message) = queued else {
                        debug!("Send queue closed for user {}", self.user_id());
                        return Ok(());
                    };
                    let text = serde_json::to_string(&message).map_err(|e| {
                        FanoutError::Internal(format!("error serializing message: {e}"))
                    })?;
                    self.write_frame(WsMessage::text(text)).await?;
                    self.stats.record_sent();
                }
                _ = ticker.tick() => {
                    self.write_frame(WsMessage::Ping(Vec::new().into())).await?;
                }
            }
        }
    }

    /// Write one frame with the standard write deadline. Observing an empty
    /// socket slot means cleanup already ran.
    async fn write_frame(&self, frame: WsMessage) -> Result<(), FanoutError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(FanoutError::ConnectionClosed);
        };
        match tokio::time::timeout(WRITE_WAIT, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify_ws_error(e)),
            Err(_) => Err(FanoutError::WriteTimeout),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown paths
    // ------------------------------------------------------------------

    /// Send a close frame and give the peer a bounded window to answer
    /// before tearing the connection down. Idempotent.
    pub async fn initiate_graceful_close(
        self: &Arc<Self>,
        deadline: Instant,
        code: CloseCode,
        reason: &str,
    ) {
        if !self.state.begin_disconnect() {
            return;
        }

        info!(
            "Initiating graceful close for user {} with code {:?}: {}",
            self.user_id(),
            code,
            reason
        );

        {
            let mut guard = self.sink.lock().await;
            let Some(sink) = guard.as_mut() else {
                drop(guard);
                debug!(
                    "Connection already gone during graceful close for user {}",
                    self.user_id()
                );
                self.cleanup().await;
                return;
            };
            let frame = WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            }));
            match tokio::time::timeout(WRITE_WAIT, sink.send(frame)).await {
                Ok(Ok(())) => {}
                _ => {
                    drop(guard);
                    warn!("Failed to send close frame to user {}", self.user_id());
                    self.cleanup().await;
                    return;
                }
            }
        }

        // Wait for the peer's close reply, bounded by the caller's deadline
        // and a fixed safety timeout, whichever is earlier.
        let ack_deadline = deadline.min(Instant::now() + CLOSE_ACK_WAIT) + CLOSE_ACK_GRACE;
        tokio::select! {
            _ = self.close_ack.notified() => {
                info!("Client {} acknowledged close", self.user_id());
            }
            _ = tokio::time::sleep_until(ack_deadline) => {
                warn!(
                    "Timeout waiting for client {} to acknowledge close",
                    self.user_id()
                );
            }
        }

        self.cleanup().await;
    }

    /// Tear the connection down. Runs exactly once no matter how many
    /// paths reach it; every later call returns immediately.
    pub async fn cleanup(self: &Arc<Self>) {
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Starting cleanup for user {}", self.user_id());

        // 1. Signal reader and writer.
        self.cancel.cancel();

        // 2. Mark the client as disconnecting.
        self.state.begin_disconnect();

        // 3+4. Take the socket out of its slot and close it, with a
        // best-effort close frame first.
        let taken = self.sink.lock().await.take();
        if let Some(mut sink) = taken {
            let frame = WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "Server closing connection".into(),
            }));
            let _ = tokio::time::timeout(CLEANUP_CLOSE_WAIT, sink.send(frame)).await;
            let _ = tokio::time::timeout(CLEANUP_CLOSE_WAIT, sink.close()).await;
        }

        // 5. Snapshot and drop the room back-references, then leave each
        // room. The client lock is released before any room lock is taken.
        let rooms: Vec<Arc<Room>> = {
            let mut map = self.rooms.write().unwrap();
            map.drain().map(|(_, room)| room).collect()
        };
        for room in rooms {
            debug!(
                "Removing user {} from room {}",
                self.user_id(),
                room.id()
            );
            room.remove_client(self);
        }

        // 6. Close the send queue.
        drop(self.send_tx.lock().unwrap().take());

        // 7. Final stats.
        info!(
            "User {} disconnected. Stats: received={} sent={} errors={} uptime={:?}",
            self.user_id(),
            self.stats.messages_received.load(Ordering::Relaxed),
            self.stats.messages_sent.load(Ordering::Relaxed),
            self.stats.errors.load(Ordering::Relaxed),
            self.stats.connected_at.elapsed()
        );

        // 8. Terminal state.
        self.state.set_disconnected();
    }
}

/// Map a transport error onto the error kinds of this crate.
pub(crate) fn classify_ws_error(err: tungstenite::Error) -> FanoutError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            FanoutError::ConnectionClosed
        }
        tungstenite::Error::Capacity(CapacityError::MessageTooLong { .. }) => {
            FanoutError::MessageTooLarge
        }
        other => FanoutError::ClientDisconnect(other.to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
