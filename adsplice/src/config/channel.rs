//! Per-channel configuration and where it comes from.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hls_splice::InsertionMode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;

/// Identifies one channel of one organisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub org: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(org: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.channel)
    }
}

/// Scheduled breaks inserted without a cue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    /// Time between break starts.
    pub interval_secs: u64,
    pub break_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub org: String,
    pub channel: String,
    /// Bitrates every break must be able to serve, in kbps.
    pub bitrate_ladder: Vec<u32>,
    /// 0 accepts cues of any tier.
    pub tier: u16,
    /// Whether cues may start breaks.
    pub auto_insert_cue: bool,
    pub auto_insert_interval: Option<IntervalSchedule>,
    /// Channel-level insertion mode. `None` leaves it to the client.
    pub mode: Option<InsertionMode>,
    /// Decision cache TTL for this channel.
    pub cache_ttl_secs: Option<u64>,
    /// Variant watched for cue tags. Defaults to the lowest ladder rung.
    pub signal_variant: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            org: String::new(),
            channel: String::new(),
            bitrate_ladder: Vec::new(),
            tier: 0,
            auto_insert_cue: true,
            auto_insert_interval: None,
            mode: None,
            cache_ttl_secs: None,
            signal_variant: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl ChannelConfig {
    pub fn new(key: &ChannelKey) -> Self {
        Self {
            org: key.org.clone(),
            channel: key.channel.clone(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(&self.org, &self.channel)
    }

    pub fn signal_variant(&self) -> Option<String> {
        self.signal_variant.clone().or_else(|| {
            self.bitrate_ladder
                .iter()
                .min()
                .map(|kbps| format!("{kbps}k.m3u8"))
        })
    }
}

/// Read-only access to channel configuration.
#[async_trait]
pub trait ConfigLookup: Send + Sync {
    async fn channel_config(&self, key: &ChannelKey) -> Result<Option<ChannelConfig>>;
}

/// Channel configs held in memory, optionally loaded from a JSON file.
#[derive(Default)]
pub struct StaticConfigLookup {
    configs: RwLock<HashMap<ChannelKey, ChannelConfig>>,
}

impl StaticConfigLookup {
    pub fn new(configs: impl IntoIterator<Item = ChannelConfig>) -> Self {
        let configs = configs.into_iter().map(|c| (c.key(), c)).collect();
        Self {
            configs: RwLock::new(configs),
        }
    }

    /// Load a JSON array of channel configs.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let configs: Vec<ChannelConfig> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), count = configs.len(), "Loaded channel configs");
        Ok(Self::new(configs))
    }

    /// Insert or replace a channel, stamping it as updated now.
    pub fn upsert(&self, mut config: ChannelConfig) {
        config.updated_at = Utc::now();
        self.configs.write().insert(config.key(), config);
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.configs.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ConfigLookup for StaticConfigLookup {
    async fn channel_config(&self, key: &ChannelKey) -> Result<Option<ChannelConfig>> {
        Ok(self.configs.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"[{"org":"acme","channel":"news","bitrate_ladder":[800,1600],"tier":2,
            "auto_insert_interval":{"interval_secs":600,"break_secs":30},"mode":"sgai"}]"#;
        let configs: Vec<ChannelConfig> = serde_json::from_str(json).unwrap();
        let c = &configs[0];
        assert_eq!(c.key(), ChannelKey::new("acme", "news"));
        assert!(c.auto_insert_cue);
        assert_eq!(c.mode, Some(InsertionMode::Sgai));
        assert_eq!(c.auto_insert_interval.unwrap().interval_secs, 600);
        assert_eq!(c.signal_variant().as_deref(), Some("800k.m3u8"));
    }

    #[tokio::test]
    async fn upsert_stamps_updated_at() {
        let key = ChannelKey::new("acme", "news");
        let lookup = StaticConfigLookup::new([ChannelConfig::new(&key)]);
        let before = lookup.channel_config(&key).await.unwrap().unwrap();
        assert_eq!(before.updated_at, DateTime::<Utc>::UNIX_EPOCH);

        lookup.upsert(ChannelConfig { tier: 3, ..before });
        let after = lookup.channel_config(&key).await.unwrap().unwrap();
        assert_eq!(after.tier, 3);
        assert!(after.updated_at > DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(lookup.keys(), vec![key]);
        assert!(
            lookup
                .channel_config(&ChannelKey::new("acme", "other"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
