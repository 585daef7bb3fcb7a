//! Matches a decision's asset against a channel's bitrate ladder.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::{LockKey, LockStore};
use super::store::{AssetStore, Rendition, VariantSet};
use super::transcode::{TranscodeJob, TranscodeQueue};
use crate::decision::Decision;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// The rendition served for one required bitrate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedVariant {
    pub required_kbps: u32,
    pub rendition: Rendition,
    /// False when `rendition` is only the closest available bitrate.
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "job_id", rename_all = "snake_case")]
pub enum TranscodeStatus {
    NotNeeded,
    Enqueued(Uuid),
    /// Another resolve holds the lock for the same gap.
    AlreadyPending,
    /// The lock store was unavailable; the job went out without dedupe.
    EnqueuedWithoutLock(Uuid),
    Failed(String),
}

impl TranscodeStatus {
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Enqueued(id) | Self::EnqueuedWithoutLock(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub asset_id: String,
    /// One entry per required bitrate that has something playable now.
    pub immediate: Vec<ResolvedVariant>,
    pub missing_bitrates: Vec<u32>,
    pub transcode: TranscodeStatus,
}

impl Resolution {
    /// Rendition for the ladder rung nearest `bitrate_kbps`, or the lowest
    /// rung when no bitrate is given.
    pub fn rendition_for(&self, bitrate_kbps: Option<u32>) -> Option<&Rendition> {
        let Some(target) = bitrate_kbps else {
            return self.immediate.first().map(|v| &v.rendition);
        };
        let mut best: Option<&ResolvedVariant> = None;
        for v in &self.immediate {
            let diff = v.required_kbps.abs_diff(target);
            if best.is_none_or(|b| diff < b.required_kbps.abs_diff(target)) {
                best = Some(v);
            }
        }
        best.map(|v| &v.rendition)
    }
}

pub struct VariantResolver {
    assets: Arc<dyn AssetStore>,
    locks: Arc<dyn LockStore>,
    queue: Arc<dyn TranscodeQueue>,
    lock_ttl: Duration,
    enqueue_timeout: Duration,
}

impl VariantResolver {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        locks: Arc<dyn LockStore>,
        queue: Arc<dyn TranscodeQueue>,
    ) -> Self {
        Self {
            assets,
            locks,
            queue,
            lock_ttl: DEFAULT_LOCK_TTL,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn assets(&self) -> &Arc<dyn AssetStore> {
        &self.assets
    }

    /// Resolve `decision` against `ladder` (kbps). An empty ladder accepts
    /// whatever the asset has. Never waits on a transcode.
    pub async fn resolve(&self, decision: &Decision, ladder: &[u32]) -> Resolution {
        let asset_id = decision.asset_id.as_str();

        if !decision.candidate_renditions.is_empty() {
            match self
                .assets
                .merge_renditions(asset_id, decision.candidate_renditions.clone())
                .await
            {
                Ok(added) if added > 0 => {
                    debug!(asset_id, added, "Merged decision renditions into asset store")
                }
                Ok(_) => {}
                Err(e) => warn!(asset_id, error = %e, "Failed to merge decision renditions"),
            }
        }

        let set = match self.assets.variant_set(asset_id).await {
            Ok(Some(set)) => set,
            Ok(None) => VariantSet::from_renditions(asset_id, decision.candidate_renditions.clone()),
            Err(e) => {
                warn!(asset_id, error = %e, "Asset store lookup failed, using decision renditions");
                VariantSet::from_renditions(asset_id, decision.candidate_renditions.clone())
            }
        };

        let mut required = if ladder.is_empty() {
            set.bitrates().collect::<Vec<_>>()
        } else {
            ladder.to_vec()
        };
        required.sort_unstable();
        required.dedup();

        let mut immediate = Vec::with_capacity(required.len());
        let mut missing_bitrates = Vec::new();
        for kbps in required {
            if let Some(rendition) = set.get(kbps) {
                immediate.push(ResolvedVariant {
                    required_kbps: kbps,
                    rendition: rendition.clone(),
                    exact: true,
                });
                continue;
            }
            missing_bitrates.push(kbps);
            if let Some(rendition) = set.closest(kbps) {
                immediate.push(ResolvedVariant {
                    required_kbps: kbps,
                    rendition: rendition.clone(),
                    exact: false,
                });
            }
        }

        let transcode = if missing_bitrates.is_empty() {
            TranscodeStatus::NotNeeded
        } else {
            self.request_transcode(asset_id, &missing_bitrates).await
        };

        Resolution {
            asset_id: asset_id.to_string(),
            immediate,
            missing_bitrates,
            transcode,
        }
    }

    async fn request_transcode(&self, asset_id: &str, missing: &[u32]) -> TranscodeStatus {
        let key = LockKey::transcode(asset_id, missing);
        let locked = match self.locks.try_acquire(&key, self.lock_ttl).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(lock = %key, "Transcode already pending");
                return TranscodeStatus::AlreadyPending;
            }
            Err(e) => {
                warn!(lock = %key, error = %e, "Lock store unavailable, enqueueing without dedupe");
                false
            }
        };

        let job = TranscodeJob::incremental(asset_id, missing.to_vec());
        let job_id = job.job_id;
        let result = tokio::time::timeout(self.enqueue_timeout, self.queue.enqueue(job)).await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("enqueue timed out".to_string()),
        };

        match failure {
            None if locked => {
                info!(asset_id, ?missing, %job_id, "Enqueued transcode job");
                TranscodeStatus::Enqueued(job_id)
            }
            None => TranscodeStatus::EnqueuedWithoutLock(job_id),
            Some(reason) => {
                warn!(asset_id, ?missing, %reason, "Failed to enqueue transcode job");
                if locked && let Err(e) = self.locks.release(&key).await {
                    warn!(lock = %key, error = %e, "Failed to release transcode lock");
                }
                TranscodeStatus::Failed(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::lock::{InMemoryLockStore, LockError};
    use crate::variant::store::InMemoryAssetStore;
    use crate::variant::transcode::ChannelTranscodeQueue;
    use async_trait::async_trait;

    struct BrokenLocks;

    #[async_trait]
    impl LockStore for BrokenLocks {
        async fn try_acquire(&self, _key: &LockKey, _ttl: Duration) -> Result<bool, LockError> {
            Err(LockError::Unavailable("connection refused".to_string()))
        }

        async fn release(&self, _key: &LockKey) -> Result<(), LockError> {
            Err(LockError::Unavailable("connection refused".to_string()))
        }
    }

    fn decision(bitrates: &[u32]) -> Decision {
        Decision {
            asset_id: "a-1".to_string(),
            candidate_renditions: bitrates
                .iter()
                .map(|b| Rendition::new(*b, format!("https://cdn.test/a-1/{b}k.m3u8")))
                .collect(),
            filler: false,
        }
    }

    fn resolver(
        locks: Arc<dyn LockStore>,
    ) -> (VariantResolver, tokio::sync::mpsc::Receiver<TranscodeJob>) {
        let (queue, rx) = ChannelTranscodeQueue::new(16);
        let resolver =
            VariantResolver::new(Arc::new(InMemoryAssetStore::new()), locks, Arc::new(queue));
        (resolver, rx)
    }

    #[tokio::test]
    async fn test_exact_and_closest_with_single_job() {
        let (resolver, mut rx) = resolver(Arc::new(InMemoryLockStore::new()));
        let res = resolver.resolve(&decision(&[800, 1600]), &[800, 1600, 2400]).await;

        assert_eq!(res.missing_bitrates, vec![2400]);
        assert_eq!(res.immediate.len(), 3);
        assert!(res.immediate[0].exact && res.immediate[1].exact);
        assert!(!res.immediate[2].exact);
        assert_eq!(res.immediate[2].rendition.bitrate_kbps, 1600);
        assert!(matches!(res.transcode, TranscodeStatus::Enqueued(_)));

        let job = rx.try_recv().unwrap();
        assert_eq!(job.target_bitrates, vec![2400]);
        assert!(job.incremental);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_held_lock_skips_enqueue() {
        let (resolver, mut rx) = resolver(Arc::new(InMemoryLockStore::new()));
        let first = resolver.resolve(&decision(&[800]), &[800, 2400]).await;
        let second = resolver.resolve(&decision(&[800]), &[2400, 800]).await;

        assert!(first.transcode.job_id().is_some());
        assert_eq!(second.transcode, TranscodeStatus::AlreadyPending);
        assert_eq!(second.immediate.len(), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lock_store_down_still_enqueues() {
        let (resolver, mut rx) = resolver(Arc::new(BrokenLocks));
        let res = resolver.resolve(&decision(&[800]), &[800, 1600]).await;
        assert!(matches!(res.transcode, TranscodeStatus::EnqueuedWithoutLock(_)));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failed_enqueue_releases_lock() {
        let locks = Arc::new(InMemoryLockStore::new());
        let (resolver, rx) = resolver(locks.clone());
        drop(rx);

        let res = resolver.resolve(&decision(&[800]), &[800, 1600]).await;
        assert!(matches!(res.transcode, TranscodeStatus::Failed(_)));
        assert!(!locks.is_held(&LockKey::transcode("a-1", &[1600])));
    }

    #[tokio::test]
    async fn test_complete_ladder_needs_nothing() {
        let (resolver, mut rx) = resolver(Arc::new(InMemoryLockStore::new()));
        let res = resolver.resolve(&decision(&[800, 1600]), &[1600, 800]).await;
        assert_eq!(res.transcode, TranscodeStatus::NotNeeded);
        assert!(res.missing_bitrates.is_empty());
        assert!(rx.try_recv().is_err());

        let all = resolver.resolve(&decision(&[]), &[]).await;
        assert_eq!(all.immediate.len(), 2);
    }

    #[tokio::test]
    async fn test_rendition_for_requested_bitrate() {
        let (resolver, _rx) = resolver(Arc::new(InMemoryLockStore::new()));
        let res = resolver.resolve(&decision(&[800, 1600]), &[800, 1600, 2400]).await;

        assert_eq!(res.rendition_for(Some(800)).unwrap().bitrate_kbps, 800);
        assert_eq!(res.rendition_for(Some(2400)).unwrap().bitrate_kbps, 1600);
        assert_eq!(res.rendition_for(None).unwrap().bitrate_kbps, 800);
    }
}
