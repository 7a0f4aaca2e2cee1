//! Integration tests for the shared primitives wired together.
//!
//! Tests: broker → Topic → subscriber → Requeue, and startup via Promise
//!
//! Verifies:
//! - Notifications fan out and their side effects are redelivered
//! - Teardown via the shared scope stops every component
//! - The Redis client round-trips a message (only with `METAEX_TEST_REDIS_URL`)

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use metaex_core::{CancellationToken, Promise, Requeue, RequeueConfig};
    use metaex_events::{InMemoryBroker, MessagingClient, Topic};

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn notifications_drive_redelivered_side_effects() {
        let scope = CancellationToken::new();
        let broker = Arc::new(InMemoryBroker::new());
        let requeue = Requeue::spawn(
            scope.clone(),
            RequeueConfig::default()
                .with_name("reindex")
                .with_pause(Duration::from_millis(10)),
        );
        let topic = Topic::new(&scope, broker.as_ref(), "schemas.changed")
            .await
            .unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let indexed = Arc::new(AtomicU32::new(0));
        {
            let requeue = requeue.clone();
            let attempts = attempts.clone();
            let indexed = indexed.clone();
            topic.subscribe(move |_topic: &str, payload: &[u8]| {
                let schema = String::from_utf8_lossy(payload).into_owned();
                let attempts = attempts.clone();
                let indexed = indexed.clone();
                requeue.push(format!("reindex {schema}"), move || {
                    let attempts = attempts.clone();
                    let indexed = indexed.clone();
                    async move {
                        // The index rejects the first attempt of every job.
                        if attempts.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                            Err("search index busy")
                        } else {
                            indexed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }
                });
            });
        }

        broker.publish("schemas.changed", b"orders").await.unwrap();
        eventually(|| indexed.load(Ordering::SeqCst) == 1).await;
        broker.publish("schemas.changed", b"customers").await.unwrap();
        eventually(|| indexed.load(Ordering::SeqCst) == 2).await;

        let stats = requeue.stats();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.dropped, 0);

        scope.cancel();
        topic.unsubscribe().await;
        requeue.closed().await;
        assert_eq!(broker.subscriber_count("schemas.changed"), 0);
    }

    #[tokio::test]
    async fn startup_promise_is_shared_by_every_waiter() {
        let broker = Arc::new(InMemoryBroker::new());
        let subscribed = {
            let broker = broker.clone();
            Promise::<usize, String>::spawn(move |settler| async move {
                let scope = CancellationToken::new();
                match Topic::new(&scope, broker.as_ref(), "datasets").await {
                    Ok(topic) => {
                        settler.resolve(topic.subscriber_count());
                        topic.unsubscribe().await;
                    }
                    Err(err) => settler.reject(err.to_string()),
                }
            })
        };

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let p = subscribed.clone();
                tokio::spawn(async move { p.wait().await })
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(0));
        }
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn redis_round_trip() {
        use crate::event_bus::RedisPubSubClient;

        let Ok(url) = std::env::var("METAEX_TEST_REDIS_URL") else {
            return;
        };
        let scope = CancellationToken::new();
        let client = RedisPubSubClient::connect(&url).await.unwrap();
        let topic = Topic::new(&scope, &client, "metaex.test").await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let into = seen.clone();
        topic.subscribe(move |_topic: &str, payload: &[u8]| {
            into.lock().unwrap().push(payload.to_vec());
        });

        client.publish("metaex.test", b"hello").await.unwrap();
        eventually(|| !seen.lock().unwrap().is_empty()).await;
        assert_eq!(seen.lock().unwrap()[0], b"hello".to_vec());

        topic.unsubscribe().await;
    }
}
