//! In-memory broker for tests/dev and single-process deployments.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BusError, Message, MessageStream, MessagingClient};

/// In-memory pub/sub broker.
///
/// - Per-topic fan-out to every live subscription
/// - Best-effort: subscriptions that went away are pruned on publish
/// - No persistence; publishing to a topic nobody listens on is a no-op
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        match topics.get_mut(topic) {
            Some(subs) => {
                subs.retain(|tx| !tx.is_closed());
                subs.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl MessagingClient for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn MessageStream>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        Ok(Box::new(InMemorySubscription { rx }))
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = topics.get_mut(topic) {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(Message::new(topic, payload)).is_ok());
        }
        Ok(())
    }
}

struct InMemorySubscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl MessageStream for InMemorySubscription {
    async fn next_message(&mut self) -> Option<Result<Message, BusError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_every_subscription() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("config.changed").await.unwrap();
        let mut b = broker.subscribe("config.changed").await.unwrap();

        broker.publish("config.changed", b"v2").await.unwrap();

        let expected = Message::new("config.changed", b"v2".to_vec());
        assert_eq!(a.next_message().await, Some(Ok(expected.clone())));
        assert_eq!(b.next_message().await, Some(Ok(expected)));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = InMemoryBroker::new();
        let mut schemas = broker.subscribe("schemas").await.unwrap();

        broker.publish("datasets", b"ignored").await.unwrap();
        broker.publish("schemas", b"seen").await.unwrap();

        let msg = schemas.next_message().await.unwrap().unwrap();
        assert_eq!(msg.payload, b"seen".to_vec());
    }

    #[tokio::test]
    async fn closed_subscriptions_are_pruned() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t").await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);

        sub.close().await.unwrap();
        drop(sub);
        broker.publish("t", b"x").await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 0);
    }
}
