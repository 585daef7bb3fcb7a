//! Channel configuration cache.
//!
//! Thread-safe, TTL-evicted, with explicit invalidation when a channel's
//! configuration changes upstream.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::channel::{ChannelConfig, ChannelKey};

/// Default TTL for cached channel configs.
pub const DEFAULT_CONFIG_TTL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct CacheEntry {
    config: Arc<ChannelConfig>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(config: Arc<ChannelConfig>, ttl: Duration) -> Self {
        Self {
            config,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Clone)]
pub struct ConfigCache {
    channel_configs: Arc<DashMap<ChannelKey, CacheEntry>>,
    ttl: Duration,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CONFIG_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            channel_configs: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Returns None if not cached or expired.
    pub fn get(&self, key: &ChannelKey) -> Option<Arc<ChannelConfig>> {
        let entry = self.channel_configs.get(key)?;

        if entry.is_expired() {
            drop(entry); // Release the shard lock before removing
            self.channel_configs.remove(key);
            return None;
        }

        Some(entry.config.clone())
    }

    pub fn insert(&self, key: ChannelKey, config: Arc<ChannelConfig>) {
        self.channel_configs
            .insert(key, CacheEntry::new(config, self.ttl));
    }

    pub fn invalidate(&self, key: &ChannelKey) {
        self.channel_configs.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.channel_configs.clear();
    }

    pub fn len(&self) -> usize {
        self.channel_configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel_configs.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.len();
        self.channel_configs.retain(|_, entry| !entry.is_expired());
        before - self.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: &ChannelKey) -> Arc<ChannelConfig> {
        Arc::new(ChannelConfig::new(key))
    }

    #[test]
    fn test_cache_insert_and_get() {
        let cache = ConfigCache::new();
        let key = ChannelKey::new("acme", "news");
        cache.insert(key.clone(), config(&key));

        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.channel, "news");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_invalidate() {
        let cache = ConfigCache::new();
        let a = ChannelKey::new("acme", "news");
        let b = ChannelKey::new("acme", "sport");
        cache.insert(a.clone(), config(&a));
        cache.insert(b.clone(), config(&b));

        cache.invalidate(&a);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_expiry() {
        let cache = ConfigCache::with_ttl(Duration::ZERO);
        let key = ChannelKey::new("acme", "news");
        cache.insert(key.clone(), config(&key));
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), config(&key));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }
}
