//! In-process fan-out over one external broker channel.
//!
//! A [`Topic`] owns exactly one subscription to a named channel and a
//! delivery task. Each inbound message is handed to every registered
//! [`Subscriber`], in subscription order, before the next inbound message is
//! read. Callbacks run while the subscriber list is locked, so they must not
//! block and must not call back into the topic; a slow subscriber stalls the
//! whole topic. That is the price of strict in-order delivery.
//!
//! The topic is torn down by [`Topic::unsubscribe`], by canceling the scope it
//! was created under, or by dropping it. Teardown closes the broker
//! subscription.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::bus::{BusError, MessageStream, MessagingClient};

/// In-process listener on a [`Topic`].
pub trait Subscriber: Send + Sync {
    fn message(&self, topic: &str, payload: &[u8]);
}

impl<F> Subscriber for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn message(&self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

type Subscribers = Arc<Mutex<Vec<Arc<dyn Subscriber>>>>;

/// Broadcast handle for one named channel.
pub struct Topic {
    name: String,
    subscribers: Subscribers,
    token: CancellationToken,
    delivery: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Topic {
    /// Subscribe to `name` on `client` and start delivering.
    ///
    /// The topic lives until `scope` is canceled or it is unsubscribed.
    pub async fn new(
        scope: &CancellationToken,
        client: &dyn MessagingClient,
        name: impl Into<String>,
    ) -> Result<Self, BusError> {
        let name = name.into();
        let stream = client.subscribe(&name).await?;
        info!(topic = %name, "subscribed to topic");

        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let token = scope.child_token();

        let span = info_span!("topic", topic = %name);
        let handle = tokio::spawn(
            deliver(stream, Arc::clone(&subscribers), token.clone()).instrument(span),
        );

        Ok(Self {
            name,
            subscribers,
            token,
            delivery: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener. Takes effect from the next inbound message.
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber + 'static,
    {
        self.subscribe_arc(Arc::new(subscriber));
    }

    pub fn subscribe_arc(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
        debug!(topic = %self.name, "subscriber registered");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop delivering and close the broker subscription.
    ///
    /// Once this returns no subscriber is called again. Idempotent, and safe
    /// after the owning scope was canceled.
    pub async fn unsubscribe(&self) {
        self.token.cancel();
        let handle = self.delivery.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(topic = %self.name, error = %err, "topic delivery task failed");
            }
        }
    }

    /// Whether delivery has stopped (or is stopping).
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn deliver(
    mut stream: Box<dyn MessageStream>,
    subscribers: Subscribers,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = stream.next_message() => next,
        };

        match next {
            Some(Ok(message)) => {
                debug!(bytes = message.payload.len(), "inbound message");
                let subs = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                for subscriber in subs.iter() {
                    subscriber.message(&message.topic, &message.payload);
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "ignoring unusable inbound message");
            }
            None => {
                warn!("broker subscription ended");
                break;
            }
        }
    }

    token.cancel();
    if let Err(err) = stream.close().await {
        warn!(error = %err, "failed to close broker subscription");
    }
    info!("unsubscribed from topic");
}
