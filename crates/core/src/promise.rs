//! Single-settlement future with any number of observers.
//!
//! A [`Promise`] is created together with the background computation that
//! settles it. The computation receives a [`Settler`] and calls exactly one of
//! [`Settler::resolve`] / [`Settler::reject`], exactly once. Any number of
//! tasks may [`Promise::wait`] on it, before or after settlement, and all of
//! them observe the same outcome.
//!
//! Settling twice is a programming error and panics. The first settlement
//! always stands.
//!
//! ```ignore
//! let promise = Promise::spawn(|settler| async move {
//!     match load_schema().await {
//!         Ok(schema) => settler.resolve(schema),
//!         Err(e) => settler.reject(e),
//!     }
//! });
//!
//! let a = promise.clone();
//! let (x, y) = tokio::join!(a.wait(), promise.wait());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

enum State<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn label(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Resolved(_) => "resolved",
            State::Rejected(_) => "rejected",
        }
    }
}

struct Inner<T, E> {
    state: Mutex<State<T, E>>,
    settled: Notify,
}

impl<T, E> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        // A panic can only happen outside the critical section, so a poisoned
        // lock still guards a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Observer side of a single-settlement future.
///
/// Cheap to clone; every clone observes the same settlement.
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
}

/// Writer side of a [`Promise`].
///
/// Clonable so `resolve` and `reject` paths can be handed to different
/// callbacks, but only one settlement may ever happen across all clones.
pub struct Settler<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.inner.lock().label())
            .finish()
    }
}

impl<T, E> fmt::Debug for Settler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("state", &self.inner.lock().label())
            .finish()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create an unsettled promise and the handle that settles it.
    pub fn pending() -> (Self, Settler<T, E>) {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::Pending),
            settled: Notify::new(),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            Settler { inner },
        )
    }

    /// Launch `computation` as an independent task and return its promise.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(computation: F) -> Self
    where
        F: FnOnce(Settler<T, E>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (promise, settler) = Self::pending();
        tokio::spawn(computation(settler));
        promise
    }

    /// Wait for settlement and return a clone of the outcome.
    pub async fn wait(&self) -> Result<T, E> {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            // Register before checking so a settlement in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Like [`Promise::wait`], but gives up after `timeout`.
    ///
    /// Returns `None` if the promise is still pending.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Outcome if already settled, without waiting.
    pub fn try_outcome(&self) -> Option<Result<T, E>> {
        match &*self.inner.lock() {
            State::Pending => None,
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.inner.lock(), State::Pending)
    }
}

impl<T, E> Settler<T, E> {
    /// Settle successfully.
    ///
    /// # Panics
    ///
    /// If the promise was already settled.
    pub fn resolve(&self, value: T) {
        self.settle(State::Resolved(value));
    }

    /// Settle with an error.
    ///
    /// # Panics
    ///
    /// If the promise was already settled.
    pub fn reject(&self, error: E) {
        self.settle(State::Rejected(error));
    }

    fn settle(&self, next: State<T, E>) {
        let mut state = self.inner.lock();
        if let State::Pending = *state {
            *state = next;
            drop(state);
            self.inner.settled.notify_waiters();
            return;
        }

        let current = state.label();
        drop(state);
        panic!(
            "promise settled twice: already {current}, refusing to become {}",
            next.label()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use proptest::prelude::*;

    #[tokio::test]
    async fn concurrent_observers_see_the_same_value() {
        let (promise, settler) = Promise::<String, String>::pending();

        let observers: Vec<_> = (0..16)
            .map(|_| {
                let p = promise.clone();
                tokio::spawn(async move { p.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        settler.resolve("schema-v3".to_string());

        for observer in observers {
            assert_eq!(observer.await.unwrap(), Ok("schema-v3".to_string()));
        }
        // Late observers get the same answer.
        assert_eq!(promise.wait().await, Ok("schema-v3".to_string()));
        assert_eq!(promise.wait().await, Ok("schema-v3".to_string()));
    }

    #[tokio::test]
    async fn spawned_computation_rejects() {
        let promise = Promise::<u32, String>::spawn(|settler| async move {
            settler.reject("backend unavailable".to_string());
        });

        assert_eq!(promise.wait().await, Err("backend unavailable".to_string()));
        assert!(promise.is_settled());
    }

    #[tokio::test]
    async fn resolve_and_reject_paths_can_be_split() {
        let promise = Promise::<u32, String>::spawn(|settler| async move {
            let on_ok = settler.clone();
            let on_err = settler;
            let result: Result<u32, String> = Ok(7);
            match result {
                Ok(v) => on_ok.resolve(v),
                Err(e) => on_err.reject(e),
            }
        });

        assert_eq!(promise.wait().await, Ok(7));
    }

    #[test]
    #[should_panic(expected = "promise settled twice")]
    fn resolving_twice_panics() {
        let (_promise, settler) = Promise::<u32, ()>::pending();
        settler.resolve(1);
        settler.resolve(1);
    }

    #[test]
    #[should_panic(expected = "already rejected")]
    fn resolving_after_reject_panics() {
        let (_promise, settler) = Promise::<u32, &'static str>::pending();
        settler.reject("boom");
        settler.resolve(1);
    }

    #[test]
    fn first_settlement_wins() {
        let (promise, settler) = Promise::<u32, &'static str>::pending();
        settler.resolve(1);

        let second = catch_unwind(AssertUnwindSafe(|| settler.reject("late")));
        assert!(second.is_err());
        assert_eq!(promise.try_outcome(), Some(Ok(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_reports_pending() {
        let (promise, _settler) = Promise::<u32, ()>::pending();
        assert_eq!(promise.wait_timeout(Duration::from_secs(5)).await, None);
        assert!(!promise.is_settled());
        assert_eq!(promise.try_outcome(), None);
    }

    proptest! {
        #[test]
        fn every_observer_sees_the_settled_outcome(
            outcome in prop_oneof![
                any::<i64>().prop_map(Ok),
                ".{0,16}".prop_map(Err),
            ],
            observers in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let seen = rt.block_on(async {
                let expected = outcome.clone();
                let promise = Promise::<i64, String>::spawn(move |settler| async move {
                    match expected {
                        Ok(v) => settler.resolve(v),
                        Err(e) => settler.reject(e),
                    }
                });

                let handles: Vec<_> = (0..observers)
                    .map(|_| {
                        let p = promise.clone();
                        tokio::spawn(async move { p.wait().await })
                    })
                    .collect();

                let mut seen = Vec::new();
                for h in handles {
                    seen.push(h.await.unwrap());
                }
                seen
            });

            prop_assert_eq!(seen.len(), observers);
            for s in seen {
                prop_assert_eq!(&s, &outcome);
            }
        }
    }
}
