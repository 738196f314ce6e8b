//! In-process bus backend.
//!
//! Clones of a `LoopbackBus` share one subscription registry, so several
//! hubs inside one process observe each other exactly as separate
//! instances would over a real bus. Used when no pub/sub URL is configured
//! and by the integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::utils::FanoutError;

use super::{BusMessage, PubSub, Subscriber};

#[derive(Debug)]
struct Session {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

type Registry = Arc<Mutex<HashMap<String, Session>>>;

/// An in-process pub/sub bus.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    sessions: Registry,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions subscribed to a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.channels.contains(channel))
            .count()
    }
}

#[async_trait]
impl PubSub for LoopbackBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError> {
        let sessions = self.sessions.lock().unwrap();
        for session in sessions.values() {
            if session.channels.contains(channel) {
                // A closed receiver means the session is going away; its
                // entry is removed when the subscriber drops.
                let _ = session.tx.send(BusMessage {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, FanoutError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().unwrap().insert(
            id.clone(),
            Session {
                channels: HashSet::new(),
                tx,
            },
        );
        Ok(Box::new(LoopbackSubscriber {
            id,
            sessions: self.sessions.clone(),
            rx,
        }))
    }
}

pub struct LoopbackSubscriber {
    id: String,
    sessions: Registry,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

#[async_trait]
impl Subscriber for LoopbackSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FanoutError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&self.id) {
            Some(session) => {
                session.channels.insert(channel.to_string());
                Ok(())
            }
            None => Err(FanoutError::BusStreamLost),
        }
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), FanoutError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&self.id) {
            Some(session) => {
                session.channels.remove(channel);
                Ok(())
            }
            None => Err(FanoutError::BusStreamLost),
        }
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for LoopbackSubscriber {
    fn drop(&mut self) {
        self.sessions.lock().unwrap().remove(&self.id);
    }
}
