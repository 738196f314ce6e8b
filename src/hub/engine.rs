//! The per-process hub.
//!
//! The hub owns the room registry, runs the single consumer that bridges
//! the pub/sub bus to local rooms, and orchestrates graceful shutdown. All
//! subscribe/unsubscribe traffic flows through the `run` loop so the bus
//! never sees concurrent writers on the dedicated session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::hub::message::Message;
use crate::hub::room::Room;
use crate::membership::Membership;
use crate::pubsub::{PubSub, Subscriber};
use crate::utils::FanoutError;

struct RegistryChannels {
    add_rx: mpsc::UnboundedReceiver<Arc<Room>>,
    remove_rx: mpsc::UnboundedReceiver<Arc<Room>>,
}

pub struct Hub {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    add_tx: mpsc::UnboundedSender<Arc<Room>>,
    remove_tx: mpsc::UnboundedSender<Arc<Room>>,
    channels: Mutex<Option<RegistryChannels>>,
    bus: Arc<dyn PubSub>,
    membership: Arc<dyn Membership>,
    shutdown: CancellationToken,
    is_shutting_down: AtomicBool,
}

impl Hub {
    pub fn new(membership: Arc<dyn Membership>, bus: Arc<dyn PubSub>) -> Arc<Self> {
        let (add_tx, add_rx) = mpsc::unbounded_channel();
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            add_tx,
            remove_tx,
            channels: Mutex::new(Some(RegistryChannels { add_rx, remove_rx })),
            bus,
            membership,
            shutdown: CancellationToken::new(),
            is_shutting_down: AtomicBool::new(false),
        })
    }

    pub fn membership(&self) -> &Arc<dyn Membership> {
        &self.membership
    }

    /// Signal that fires once graceful shutdown begins; the transport stops
    /// accepting new connections on it.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn find_room(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().unwrap().get(id).cloned()
    }

    /// Look a room up, creating and registering it on first reference.
    /// Returns the room and whether it was created by this call.
    pub fn room(&self, id: &str) -> (Arc<Room>, bool) {
        if let Some(room) = self.rooms.read().unwrap().get(id) {
            return (room.clone(), false);
        }
        let mut rooms = self.rooms.write().unwrap();
        if let Some(room) = rooms.get(id) {
            return (room.clone(), false);
        }
        let room = Room::new(id, self.bus.clone(), self.remove_tx.clone());
        rooms.insert(id.to_string(), room.clone());
        let _ = self.add_tx.send(room.clone());
        tokio::spawn(room.clone().watch_clients());
        (room, true)
    }

    /// Bridge the bus to local rooms. Blocks for the lifetime of the
    /// process; returning an error means the pub/sub stream is lost and
    /// the process should exit so the orchestrator restarts it.
    pub async fn run(self: Arc<Self>) -> Result<(), FanoutError> {
        let mut subscriber = self.bus.subscriber().await?;
        let RegistryChannels {
            mut add_rx,
            mut remove_rx,
        } = self
            .channels
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FanoutError::Internal("hub run loop started twice".to_string()))?;

        info!("Started listening for multi instance communication");

        loop {
            tokio::select! {
                Some(room) = add_rx.recv() => {
                    self.rooms
                        .write()
                        .unwrap()
                        .insert(room.id().to_string(), room.clone());
                    subscriber.subscribe(&room.channel()).await?;
                    info!("Subscribed to room {}", room.id());
                }
                Some(room) = remove_rx.recv() => {
                    self.rooms.write().unwrap().remove(room.id());
                    subscriber.unsubscribe(&room.channel()).await?;
                    info!("Unsubscribed from room {}", room.id());
                }
                received = subscriber.next_message() => {
                    let Some(bus_msg) = received else {
                        error!("Failed to handle multi instance pub sub stream");
                        return Err(FanoutError::BusStreamLost);
                    };
                    let message: Message = match serde_json::from_str(&bus_msg.payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Failed to decode message from the bus: {}", e);
                            continue;
                        }
                    };
                    let room = { self.rooms.read().unwrap().get(&message.room).cloned() };
                    match room {
                        Some(room) => room.broadcast(&message).await,
                        // The room has been retired locally since the
                        // subscription was initiated; the remove path will
                        // drop the subscription.
                        None => warn!("Received message for unknown room {}", message.room),
                    }
                }
            }
        }
    }

    /// Initiate a controlled shutdown of the hub.
    ///
    /// Idempotent: every call after the first returns `Ok(())` regardless
    /// of outcome. Returns `ShutdownTimeout` iff the deadline expired
    /// before all rooms finished.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> Result<(), FanoutError> {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already in progress");
            return Ok(());
        }

        info!(
            "Initiating graceful shutdown of the hub with {} seconds timeout",
            timeout.as_secs()
        );
        let deadline = Instant::now() + timeout;

        // Phase 1: stop accepting new connections
        self.shutdown.cancel();

        // Phase 2: tell every room to close its clients
        let rooms: Vec<Arc<Room>> = { self.rooms.read().unwrap().values().cloned().collect() };
        let room_count = rooms.len();
        let mut shutdowns = JoinSet::new();
        for room in rooms {
            shutdowns.spawn(async move {
                let (count, result) = room.shutdown(deadline).await;
                if let Err(e) = result {
                    error!("Error shutting down room {}: {}", room.id(), e);
                }
                count
            });
        }
        info!("Initiated shutdown of {} rooms", room_count);

        // Phase 3: wait for the rooms or the deadline
        let wait_all = async {
            let mut clients = 0usize;
            while let Some(joined) = shutdowns.join_next().await {
                clients += joined.unwrap_or(0);
            }
            clients
        };
        let timed_out = match tokio::time::timeout_at(deadline, wait_all).await {
            Ok(clients) => {
                info!(
                    "All rooms completed shutdown, {} clients processed",
                    clients
                );
                false
            }
            Err(_) => {
                warn!("Timeout waiting for rooms to shutdown");
                true
            }
        };

        // Phase 4: external resources (bus, database pool) are released
        // when their handles drop with the hub.
        info!("Graceful shutdown completed");

        if timed_out {
            Err(FanoutError::ShutdownTimeout)
        } else {
            Ok(())
        }
    }
}
