//! The `pubsub` module defines the cross-instance bus contract.
//!
//! The fan-out core consumes the external bus through a minimal interface:
//! a `publish` call, and a dedicated subscriber session that supports
//! `subscribe`/`unsubscribe` and yields inbound messages. The end of the
//! subscriber stream signals stream loss, which the hub treats as fatal.
//!
//! Two backends are provided: `redis` for multi-instance deployments and
//! `loopback`, an in-process bus for single-instance setups and tests.

pub mod loopback;
pub mod redis;

use async_trait::async_trait;

use crate::utils::FanoutError;

pub use loopback::LoopbackBus;
pub use redis::RedisBus;

/// One message received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Publish side of the external bus.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload to a channel. Delivery is at-least-once to every
    /// currently-subscribed session, including sessions on this instance.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError>;

    /// Open a dedicated subscriber session.
    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, FanoutError>;
}

/// A dedicated subscriber session on the bus.
///
/// Sessions are driven by a single consumer; the hub's run loop is the only
/// caller, so backends do not need to support concurrent operations.
#[async_trait]
pub trait Subscriber: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FanoutError>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), FanoutError>;

    /// Wait for the next message. `None` means the stream is lost.
    async fn next_message(&mut self) -> Option<BusMessage>;
}
