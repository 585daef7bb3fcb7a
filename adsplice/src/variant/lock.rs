//! Transcode locks.
//!
//! A lock is an exclusivity record with a TTL. Acquisition must be a single
//! atomic set-if-absent, never a read followed by a write.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Key for transcoding `bitrates` of `asset_id`. Bitrate order does not
    /// matter.
    pub fn transcode(asset_id: &str, bitrates: &[u32]) -> Self {
        let mut sorted = bitrates.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let list = sorted
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("transcode:{asset_id}:{list}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock if nobody holds it. `Ok(false)` means it is held.
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<bool, LockError>;

    async fn release(&self, key: &LockKey) -> Result<(), LockError>;

    /// Drop expired locks, returning how many went. Stores that expire keys
    /// on their own keep the default.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Process-local lock store. Each acquisition holds the key's shard lock
/// for the whole check-and-set.
#[derive(Default)]
pub struct InMemoryLockStore {
    locks: DashMap<LockKey, Instant>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.locks
            .get(key)
            .is_some_and(|expires_at| Instant::now() < *expires_at)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        match self.locks.entry(key.clone()) {
            Entry::Occupied(mut held) => {
                if now < *held.get() {
                    Ok(false)
                } else {
                    held.insert(now + ttl);
                    Ok(true)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &LockKey) -> Result<(), LockError> {
        self.locks.remove(key);
        Ok(())
    }

    fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, expires_at| now < *expires_at);
        before.saturating_sub(self.locks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_key_sorts_bitrates() {
        assert_eq!(
            LockKey::transcode("a-1", &[2400, 800]),
            LockKey::transcode("a-1", &[800, 2400, 800])
        );
        assert_eq!(LockKey::transcode("a-1", &[2400, 800]).as_str(), "transcode:a-1:800,2400");
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_released() {
        let store = InMemoryLockStore::new();
        let key = LockKey::transcode("a-1", &[2400]);
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire(&key, ttl).await.unwrap());
        assert!(!store.try_acquire(&key, ttl).await.unwrap());
        assert!(store.is_held(&key));

        store.release(&key).await.unwrap();
        assert!(store.try_acquire(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let store = InMemoryLockStore::new();
        let key = LockKey::transcode("a-1", &[2400]);
        assert!(store.try_acquire(&key, Duration::ZERO).await.unwrap());
        assert!(!store.is_held(&key));
        assert!(store.try_acquire(&key, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_drops_only_expired_locks() {
        let store = InMemoryLockStore::new();
        let stale_a = LockKey::transcode("a-1", &[2400]);
        let stale_b = LockKey::transcode("a-2", &[1600]);
        let live = LockKey::transcode("a-3", &[800]);
        store.try_acquire(&stale_a, Duration::ZERO).await.unwrap();
        store.try_acquire(&stale_b, Duration::ZERO).await.unwrap();
        store.try_acquire(&live, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.cleanup_expired(), 2);
        assert_eq!(store.locks.len(), 1);
        assert!(store.is_held(&live));
        assert_eq!(store.cleanup_expired(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_single_winner() {
        let store = Arc::new(InMemoryLockStore::new());
        let key = LockKey::transcode("a-1", &[2400]);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let store = store.clone();
            let key = key.clone();
            tasks.spawn(async move { store.try_acquire(&key, Duration::from_secs(60)).await });
        }

        let mut winners = 0;
        while let Some(res) = tasks.join_next().await {
            if res.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
