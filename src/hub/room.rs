//! The local subscriber set for one logical chat room.
//!
//! A room only knows the clients connected to this instance; membership on
//! other instances is invisible here and reached through the bus. Lock
//! order when two locks are held is always Room -> Client.rooms, never the
//! reverse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use tungstenite::protocol::frame::coding::CloseCode;

use crate::client::{Client, EnqueueOutcome};
use crate::hub::message::Message;
use crate::pubsub::PubSub;
use crate::utils::FanoutError;

/// Deadline for a single publish to the bus.
pub(crate) const PUBLISH_WAIT: Duration = Duration::from_secs(2);
/// Concurrent fan-out attempts per broadcast.
const BROADCAST_CONCURRENCY: usize = 100;
/// Concurrent client closes during room shutdown.
const SHUTDOWN_CONCURRENCY: usize = 50;
/// How often the empty-room watcher checks the client count.
pub(crate) const ROOM_GC_INTERVAL: Duration = Duration::from_secs(60);
/// Margin subtracted from the shutdown deadline at each hop so outer
/// layers never block on inner stragglers.
const SHUTDOWN_DEADLINE_STEP: Duration = Duration::from_millis(500);

pub struct Room {
    id: String,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    client_count: AtomicI64,
    bus: Arc<dyn PubSub>,
    remove_tx: mpsc::UnboundedSender<Arc<Room>>,
    shutdown_started: AtomicBool,
}

impl Room {
    pub(crate) fn new(
        id: &str,
        bus: Arc<dyn PubSub>,
        remove_tx: mpsc::UnboundedSender<Arc<Room>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            clients: RwLock::new(HashMap::new()),
            client_count: AtomicI64::new(0),
            bus,
            remove_tx,
            shutdown_started: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bus channel carrying this room's traffic.
    pub fn channel(&self) -> String {
        format!("room-{}", self.id)
    }

    pub fn client_count(&self) -> i64 {
        self.client_count.load(Ordering::SeqCst)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.clients.read().unwrap().contains_key(user_id)
    }

    /// Insert a client and establish its back-reference. No-op once
    /// shutdown has started.
    pub fn add_client(self: &Arc<Self>, client: &Arc<Client>) {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return;
        }
        let mut clients = self.clients.write().unwrap();
        if clients
            .insert(client.user_id().to_string(), client.clone())
            .is_none()
        {
            self.client_count.fetch_add(1, Ordering::SeqCst);
        }
        client.insert_room(self.clone());
    }

    /// Remove a client and its back-reference. Safe to call twice.
    pub fn remove_client(&self, client: &Client) {
        {
            let mut clients = self.clients.write().unwrap();
            if clients.remove(client.user_id()).is_some() {
                self.client_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
        client.drop_room(&self.id);
    }

    /// Publish a message onto this room's bus channel with the standard
    /// publish deadline.
    pub async fn publish(&self, message: &Message) -> Result<(), FanoutError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| FanoutError::Internal(format!("error serializing message: {e}")))?;
        match tokio::time::timeout(PUBLISH_WAIT, self.bus.publish(&self.channel(), payload)).await {
            Ok(result) => result,
            Err(_) => Err(FanoutError::BusPublishFailed(
                "publish deadline exceeded".to_string(),
            )),
        }
    }

    /// Fan a message out to every local subscriber.
    ///
    /// The subscriber snapshot is taken under the read lock; the attempts
    /// themselves are non-blocking enqueues. A client whose send queue is
    /// full is evicted from the room instead of delaying the others, and
    /// its connection is cleaned up since it has already lost messages.
    pub async fn broadcast(self: &Arc<Self>, message: &Message) {
        let targets: Vec<Arc<Client>> =
            { self.clients.read().unwrap().values().cloned().collect() };
        if targets.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(BROADCAST_CONCURRENCY));
        let mut attempts = JoinSet::new();
        for client in targets {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let room = self.clone();
            let msg = message.clone();
            attempts.spawn(async move {
                let _permit = permit;
                match client.try_enqueue(&msg) {
                    EnqueueOutcome::Delivered => {}
                    EnqueueOutcome::Full | EnqueueOutcome::Closed => {
                        warn!(
                            "Send queue saturated for user {} in room {}, evicting",
                            client.user_id(),
                            room.id
                        );
                        room.remove_client(&client);
                        // Teardown happens off the broadcast path; fan-out
                        // never waits on a single client.
                        tokio::spawn(async move { client.cleanup().await });
                    }
                }
            });
        }
        while attempts.join_next().await.is_some() {}
    }

    /// Periodically checks the client count and retires the room once it
    /// has been empty for a full interval.
    pub(crate) async fn watch_clients(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + ROOM_GC_INTERVAL, ROOM_GC_INTERVAL);
        loop {
            ticker.tick().await;
            if self.shutdown_started.load(Ordering::SeqCst) {
                return;
            }
            if self.client_count.load(Ordering::SeqCst) < 1 {
                let _ = self.remove_tx.send(self.clone());
                return;
            }
        }
    }

    /// Gracefully close every client in this room.
    ///
    /// One-shot: later calls return `(0, Ok(()))`. Clients get a deadline
    /// 500 ms earlier than the room's so the hub never blocks on a
    /// straggler.
    pub async fn shutdown(self: &Arc<Self>, deadline: Instant) -> (usize, Result<(), FanoutError>) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return (0, Ok(()));
        }

        let clients: Vec<Arc<Client>> =
            { self.clients.read().unwrap().values().cloned().collect() };
        let client_count = clients.len();
        let client_deadline = deadline
            .checked_sub(SHUTDOWN_DEADLINE_STEP)
            .unwrap_or(deadline);

        let semaphore = Arc::new(Semaphore::new(SHUTDOWN_CONCURRENCY));
        let mut closes = JoinSet::new();
        for client in clients {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            closes.spawn(async move {
                let _permit = permit;
                client
                    .initiate_graceful_close(
                        client_deadline,
                        CloseCode::Away,
                        "Server is shutting down",
                    )
                    .await;
            });
        }

        let wait_all = async {
            while closes.join_next().await.is_some() {}
        };
        match tokio::time::timeout_at(deadline, wait_all).await {
            Ok(()) => {
                info!(
                    "Room {} shutdown complete with {} clients",
                    self.id, client_count
                );
                (client_count, Ok(()))
            }
            Err(_) => (client_count, Err(FanoutError::ShutdownTimeout)),
        }
    }
}
