//! Redis bus backend.
//!
//! Publishing goes over one multiplexed connection shared by all clients;
//! each hub opens its own dedicated pub/sub session whose sink half carries
//! the SUBSCRIBE/UNSUBSCRIBE commands while the stream half yields inbound
//! messages.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use redis::IntoConnectionInfo;

use crate::config::PubSubSettings;
use crate::utils::FanoutError;

use super::{BusMessage, PubSub, Subscriber};

pub struct RedisBus {
    client: redis::Client,
    publish_conn: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to the bus and announce the configured client name.
    pub async fn connect(settings: &PubSubSettings) -> Result<Self, FanoutError> {
        let mut info = settings
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| FanoutError::Internal(format!("invalid pub/sub url: {e}")))?;
        if !settings.username.is_empty() {
            info.redis.username = Some(settings.username.clone());
        }
        if !settings.password.is_empty() {
            info.redis.password = Some(settings.password.clone());
        }

        let client = redis::Client::open(info)
            .map_err(|e| FanoutError::Internal(format!("failed to open pub/sub client: {e}")))?;
        let mut publish_conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| FanoutError::Internal(format!("failed to connect to the bus: {e}")))?;

        if !settings.client_name.is_empty() {
            let _: () = redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(&settings.client_name)
                .query_async(&mut publish_conn)
                .await
                .map_err(|e| FanoutError::Internal(format!("failed to set client name: {e}")))?;
        }

        Ok(Self {
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), FanoutError> {
        let mut conn = self.publish_conn.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| FanoutError::BusPublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn Subscriber>, FanoutError> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| FanoutError::Internal(format!("failed to open subscriber session: {e}")))?;
        let (sink, stream) = pubsub.split();
        Ok(Box::new(RedisSubscriber { sink, stream }))
    }
}

pub struct RedisSubscriber {
    sink: PubSubSink,
    stream: PubSubStream,
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FanoutError> {
        self.sink
            .subscribe(channel)
            .await
            .map_err(|_| FanoutError::BusStreamLost)
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), FanoutError> {
        self.sink
            .unsubscribe(channel)
            .await
            .map_err(|_| FanoutError::BusStreamLost)
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        while let Some(msg) = self.stream.next().await {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(BusMessage { channel, payload }),
                Err(e) => {
                    tracing::warn!("Dropping non-UTF-8 payload on channel {}: {}", channel, e);
                }
            }
        }
        None
    }
}
