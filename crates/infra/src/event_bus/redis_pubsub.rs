//! Redis pub/sub-backed messaging client.
//!
//! Redis pub/sub is not durable: a message published while a subscriber is
//! disconnected is gone. Each subscription gets its own connection, as Redis
//! requires; publishing shares one multiplexed connection.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::{MultiplexedConnection, PubSub};
use tracing::debug;

use metaex_events::{BusError, Message, MessageStream, MessagingClient};

/// [`MessagingClient`] over Redis pub/sub.
#[derive(Clone)]
pub struct RedisPubSubClient {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl std::fmt::Debug for RedisPubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSubClient")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisPubSubClient {
    /// Open the publishing connection. Fails if Redis is unreachable.
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(connection)?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection)?;
        Ok(Self { client, publisher })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }
}

#[async_trait]
impl MessagingClient for RedisPubSubClient {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn MessageStream>, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(connection)?;
        pubsub.subscribe(topic).await.map_err(command)?;
        debug!(topic, "redis subscription opened");

        Ok(Box::new(RedisSubscription {
            topic: topic.to_string(),
            pubsub: Some(pubsub),
        }))
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn.publish(topic, payload).await.map_err(command)?;
        Ok(())
    }
}

struct RedisSubscription {
    topic: String,
    pubsub: Option<PubSub>,
}

#[async_trait]
impl MessageStream for RedisSubscription {
    async fn next_message(&mut self) -> Option<Result<Message, BusError>> {
        let pubsub = self.pubsub.as_mut()?;
        let msg = pubsub.on_message().next().await?;

        Some(
            msg.get_payload::<Vec<u8>>()
                .map(|payload| Message::new(msg.get_channel_name(), payload))
                .map_err(|e| BusError::Malformed(e.to_string())),
        )
    }

    async fn close(&mut self) -> Result<(), BusError> {
        let Some(mut pubsub) = self.pubsub.take() else {
            return Ok(());
        };
        pubsub.unsubscribe(&self.topic).await.map_err(command)?;
        debug!(topic = %self.topic, "redis subscription closed");
        Ok(())
    }
}

fn connection(err: redis::RedisError) -> BusError {
    BusError::Connection(err.to_string())
}

fn command(err: redis::RedisError) -> BusError {
    BusError::Command(err.to_string())
}
