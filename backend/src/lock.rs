//! Single-flight lock over `set_if_absent`
//!
//! At most one refresher holds the key at a time. Each acquisition writes a
//! fresh token and release deletes the key only while it still holds that
//! token, so a holder whose TTL lapsed cannot free a successor's lock. The
//! TTL frees the key if the holder dies first.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BackendResult;
use crate::kv::KeyValueStore;

pub struct SingleFlightLock {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
}

/// Proof of holding a [`SingleFlightLock`]
#[must_use = "the lock stays held until released or expired"]
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
}

impl SingleFlightLock {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    /// `None` when someone else holds the lock
    pub async fn try_acquire(&self) -> BackendResult<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if !self.store.set_if_absent(&self.key, &token, self.ttl).await? {
            debug!(key = %self.key, "lock already held");
            return Ok(None);
        }
        Ok(Some(LockGuard {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            token,
        }))
    }
}

impl LockGuard {
    /// Give the lock up; `false` when it had already expired
    pub async fn release(self) -> BackendResult<bool> {
        let released = self.store.delete_if_equals(&self.key, &self.token).await?;
        if !released {
            warn!(key = %self.key, "lock expired before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn lock(store: &Arc<dyn KeyValueStore>) -> SingleFlightLock {
        SingleFlightLock::new(Arc::clone(store), "lock", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let lock = lock(&store);

        let guard = lock.try_acquire().await.unwrap().expect("first acquire");
        assert!(lock.try_acquire().await.unwrap().is_none());

        assert!(guard.release().await.unwrap());
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lock_expires() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let lock = lock(&store);

        let abandoned = lock.try_acquire().await.unwrap();
        assert!(abandoned.is_some());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_release_keeps_successor_lock() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let lock = lock(&store);

        let slow = lock.try_acquire().await.unwrap().expect("first holder");
        tokio::time::advance(Duration::from_secs(31)).await;
        let successor = lock.try_acquire().await.unwrap().expect("lock expired");

        assert!(!slow.release().await.unwrap(), "expired guard releases nothing");
        assert!(
            lock.try_acquire().await.unwrap().is_none(),
            "successor still holds the lock"
        );
        assert!(successor.release().await.unwrap());
    }
}
