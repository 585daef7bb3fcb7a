//! Cached access to channel configuration.

use std::sync::Arc;

use tracing::debug;

use super::cache::ConfigCache;
use super::channel::{ChannelConfig, ChannelKey, ConfigLookup};
use crate::Result;

pub struct ConfigService {
    lookup: Arc<dyn ConfigLookup>,
    cache: ConfigCache,
}

impl ConfigService {
    pub fn new(lookup: Arc<dyn ConfigLookup>) -> Self {
        Self::with_cache(lookup, ConfigCache::new())
    }

    pub fn with_cache(lookup: Arc<dyn ConfigLookup>, cache: ConfigCache) -> Self {
        Self { lookup, cache }
    }

    /// Cached config for `key`, going to the lookup on a miss.
    pub async fn get_channel_config(&self, key: &ChannelKey) -> Result<Option<Arc<ChannelConfig>>> {
        if let Some(config) = self.cache.get(key) {
            return Ok(Some(config));
        }

        debug!(channel = %key, "Config cache miss");
        let Some(config) = self.lookup.channel_config(key).await? else {
            return Ok(None);
        };
        let config = Arc::new(config);
        self.cache.insert(key.clone(), config.clone());
        Ok(Some(config))
    }

    /// Drop the cached config and read it again.
    pub async fn refresh(&self, key: &ChannelKey) -> Result<Option<Arc<ChannelConfig>>> {
        self.cache.invalidate(key);
        self.get_channel_config(key).await
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigLookup;

    #[tokio::test]
    async fn test_refresh_sees_upstream_change() {
        let key = ChannelKey::new("acme", "news");
        let lookup = Arc::new(StaticConfigLookup::new([ChannelConfig::new(&key)]));
        let service = ConfigService::new(lookup.clone());

        assert_eq!(service.get_channel_config(&key).await.unwrap().unwrap().tier, 0);

        lookup.upsert(ChannelConfig {
            tier: 2,
            ..ChannelConfig::new(&key)
        });
        // Still served from cache until invalidated.
        assert_eq!(service.get_channel_config(&key).await.unwrap().unwrap().tier, 0);
        assert_eq!(service.refresh(&key).await.unwrap().unwrap().tier, 2);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let service = ConfigService::new(Arc::new(StaticConfigLookup::default()));
        let key = ChannelKey::new("acme", "missing");
        assert!(service.get_channel_config(&key).await.unwrap().is_none());
        assert!(service.cache().is_empty());
    }
}
