//! Decision cache.
//!
//! Keyed by channel, break duration and a coarse viewer bucket. Entries
//! expire on TTL and are also dropped when the channel's configuration was
//! updated after they were created.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{Decision, DecisionSource, ViewerContext};
use crate::config::{ChannelConfig, ChannelKey};

pub const DEFAULT_VIEWER_BUCKETS: u32 = 16;
pub const DEFAULT_DECISION_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_millis(1500);

/// Bucket for `viewer_id` out of `buckets`. Anonymous viewers share bucket 0.
pub fn viewer_bucket(viewer_id: Option<&str>, buckets: u32) -> u32 {
    let Some(id) = viewer_id else {
        return 0;
    };
    let digest = Sha256::digest(id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % buckets.max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub channel: ChannelKey,
    pub break_millis: u64,
    pub bucket: u32,
}

impl DecisionKey {
    pub fn new(channel: ChannelKey, break_secs: f64, bucket: u32) -> Self {
        Self {
            channel,
            break_millis: (break_secs.max(0.0) * 1000.0).round() as u64,
            bucket,
        }
    }
}

#[derive(Clone)]
struct CachedDecision {
    decision: Decision,
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

/// Outcome of [`DecisionCache::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedDecision {
    pub decision: Decision,
    pub cache_hit: bool,
    pub timed_out: bool,
    /// The source failed or timed out and the filler was substituted.
    pub fallback: bool,
}

pub struct DecisionCache {
    source: Arc<dyn DecisionSource>,
    entries: DashMap<DecisionKey, CachedDecision>,
    timeout: Duration,
    default_ttl: Duration,
    buckets: u32,
    filler_asset: String,
}

impl DecisionCache {
    pub fn new(source: Arc<dyn DecisionSource>, filler_asset: impl Into<String>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            timeout: DEFAULT_DECISION_TIMEOUT,
            default_ttl: DEFAULT_DECISION_TTL,
            buckets: DEFAULT_VIEWER_BUCKETS,
            filler_asset: filler_asset.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn key_for(&self, config: &ChannelConfig, break_secs: f64, viewer: &ViewerContext) -> DecisionKey {
        DecisionKey::new(
            config.key(),
            break_secs,
            viewer_bucket(viewer.viewer_id.as_deref(), self.buckets),
        )
    }

    /// Cached decision, unless expired or older than `config_updated_at`.
    pub fn get(&self, key: &DecisionKey, config_updated_at: DateTime<Utc>) -> Option<Decision> {
        let entry = self.entries.get(key)?;

        if Instant::now() >= entry.expires_at || entry.created_at < config_updated_at {
            drop(entry);
            self.entries.remove(key);
            debug!(channel = %key.channel, "Discarded stale decision");
            return None;
        }

        Some(entry.decision.clone())
    }

    pub fn insert(&self, key: DecisionKey, decision: Decision, ttl: Duration) {
        self.entries.insert(
            key,
            CachedDecision {
                decision,
                created_at: Utc::now(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Cached decision or a fresh one from the source, bounded by the
    /// timeout. Timeouts and errors yield an uncached filler.
    pub async fn resolve(
        &self,
        config: &ChannelConfig,
        break_secs: f64,
        viewer: &ViewerContext,
    ) -> ResolvedDecision {
        let key = self.key_for(config, break_secs, viewer);
        if let Some(decision) = self.get(&key, config.updated_at) {
            return ResolvedDecision {
                decision,
                cache_hit: true,
                timed_out: false,
                fallback: false,
            };
        }

        let channel = config.key();
        let call = self.source.decide(&channel, break_secs, viewer);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(decision)) => {
                let ttl = config
                    .cache_ttl_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_ttl);
                self.insert(key, decision.clone(), ttl);
                ResolvedDecision {
                    decision,
                    cache_hit: false,
                    timed_out: false,
                    fallback: false,
                }
            }
            Ok(Err(e)) => {
                warn!(%channel, error = %e, "Decision source failed, using filler");
                self.filler(false)
            }
            Err(_) => {
                warn!(%channel, timeout = ?self.timeout, "Decision timed out, using filler");
                self.filler(true)
            }
        }
    }

    fn filler(&self, timed_out: bool) -> ResolvedDecision {
        ResolvedDecision {
            decision: Decision::filler(&self.filler_asset),
            cache_hit: false,
            timed_out,
            fallback: true,
        }
    }

    pub fn invalidate_channel(&self, channel: &ChannelKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| &key.channel != channel);
        before - self.entries.len()
    }

    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
