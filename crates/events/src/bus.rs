//! Messaging backend contract (mechanics only).
//!
//! A [`MessagingClient`] is the external broker a [`Topic`](crate::Topic)
//! sits on: it can subscribe to a named channel, yielding a sequence of
//! inbound payloads, and publish to one. Implementations live next to the
//! transport they wrap (in-memory here, Redis in `metaex-infra`).
//!
//! ## Delivery Guarantees
//!
//! Whatever the backend gives. Redis pub/sub and the in-memory broker are
//! both at-most-once and drop messages for subscribers that are not
//! connected; nothing here adds persistence.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// One inbound message from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Could not reach the broker.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The broker refused or failed a command.
    #[error("broker command error: {0}")]
    Command(String),

    /// An inbound message arrived without a usable payload.
    #[error("malformed inbound message: {0}")]
    Malformed(String),

    /// The subscription or broker has been closed.
    #[error("closed")]
    Closed,
}

/// Inbound side of one subscription.
#[async_trait]
pub trait MessageStream: Send {
    /// Next inbound item.
    ///
    /// `Some(Err(_))` is a single broken message; the stream is still usable.
    /// `None` means the subscription ended and will not yield again.
    async fn next_message(&mut self) -> Option<Result<Message, BusError>>;

    /// Close the subscription at the broker.
    async fn close(&mut self) -> Result<(), BusError>;
}

/// External broker client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn MessageStream>, BusError>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

#[async_trait]
impl<C> MessagingClient for Arc<C>
where
    C: MessagingClient + ?Sized,
{
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn MessageStream>, BusError> {
        (**self).subscribe(topic).await
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        (**self).publish(topic, payload).await
    }
}
