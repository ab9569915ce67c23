//! Single-assignment values resolved from inside a running task.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{SharedError, WeaveError};

type Slot<T> = Option<Result<T, SharedError>>;

/// Write side of a [`Deferred`]. The first `resolve`/`reject` wins.
#[derive(Debug)]
pub struct Resolver<T> {
    tx: watch::Sender<Slot<T>>,
}

/// A value that becomes available once; reading before then suspends.
#[derive(Debug, Clone)]
pub struct Deferred<T> {
    rx: watch::Receiver<Slot<T>>,
}

/// Create a linked resolver/deferred pair.
pub fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (tx, rx) = watch::channel(None);
    (Resolver { tx }, Deferred { rx })
}

impl<T> Resolver<T> {
    /// Resolve the value. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error. Returns `false` if it was already settled.
    pub fn reject(&self, error: SharedError) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn settle(&self, outcome: Result<T, SharedError>) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }
}

impl<T: Clone> Deferred<T> {
    /// Wait for the value.
    ///
    /// Fails if the resolver was dropped without settling.
    pub async fn get(&self) -> Result<T, SharedError> {
        let mut rx = self.rx.clone();
        let settled = rx.wait_for(|slot| slot.is_some()).await;
        match settled {
            Ok(slot) => match &*slot {
                Some(outcome) => outcome.clone(),
                None => Err(dropped()),
            },
            Err(_) => Err(dropped()),
        }
    }

    /// The value if it has already been settled.
    pub fn peek(&self) -> Option<Result<T, SharedError>> {
        self.rx.borrow().clone()
    }
}

fn dropped() -> SharedError {
    Arc::new(WeaveError::InvalidState(
        "deferred value was dropped before it was resolved".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_waits_for_resolution() {
        let (resolver, value) = deferred::<u32>();

        let reader = tokio::spawn(async move { value.get().await });
        tokio::task::yield_now().await;
        resolver.resolve(7);

        assert_eq!(reader.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn second_settlement_is_ignored() {
        let (resolver, value) = deferred::<&'static str>();

        assert!(resolver.resolve("first"));
        assert!(!resolver.reject(Arc::new(WeaveError::Aborted)));

        assert_eq!(value.get().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn dropping_resolver_fails_readers() {
        let (resolver, value) = deferred::<u32>();
        drop(resolver);

        let err = value.get().await.unwrap_err();

        assert!(matches!(*err, WeaveError::InvalidState(_)));
    }
}
