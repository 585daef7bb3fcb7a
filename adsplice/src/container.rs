//! Service container for dependency injection.
//!
//! Builds every long-lived component from [`AppConfig`] and owns the
//! cancellation token the background tasks hang off.

use std::sync::Arc;
use std::time::Duration;

use hls_splice::UriSigner;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{BlobStore, HttpBlobStore};
use crate::channel::{ChannelActorSettings, ChannelRegistry};
use crate::config::{AppConfig, ConfigCache, ConfigService, StaticConfigLookup};
use crate::decision::{DecisionCache, DecisionSource, HttpDecisionSource, StaticDecisionSource};
use crate::events::{EventSink, TracingEventSink};
use crate::monitor::SignalMonitor;
use crate::origin::{HttpOriginSource, OriginSource};
use crate::service::ManifestService;
use crate::variant::{
    AssetStore, ChannelTranscodeQueue, InMemoryAssetStore, InMemoryLockStore, LockStore,
    TranscodeJob, TranscodeQueue, VariantResolver,
};
use crate::{Error, Result};

/// Timeout for origin and ad playlist fetches.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often expired cache entries are swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// The pluggable edges of the service. [`ServiceParts::from_config`] gives
/// the production set; tests swap in in-memory ones.
pub struct ServiceParts {
    pub channels: Arc<StaticConfigLookup>,
    pub decision_source: Arc<dyn DecisionSource>,
    pub origin: Arc<dyn OriginSource>,
    pub blobs: Arc<dyn BlobStore>,
    pub assets: Arc<dyn AssetStore>,
    pub locks: Arc<dyn LockStore>,
    pub transcode_queue: Arc<dyn TranscodeQueue>,
    /// Receiving end of `transcode_queue`, when it is an in-process queue.
    pub transcode_jobs: Option<mpsc::Receiver<TranscodeJob>>,
    pub events: Arc<dyn EventSink>,
}

impl ServiceParts {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let channels = match &config.channels_file {
            Some(path) => StaticConfigLookup::from_json_file(path).await?,
            None => {
                warn!("No channels file configured, starting with no channels");
                StaticConfigLookup::default()
            }
        };

        let decision_source: Arc<dyn DecisionSource> = match &config.decision_url {
            Some(url) => Arc::new(HttpDecisionSource::new(url.clone(), &config.filler_asset)?),
            None => {
                info!(filler = %config.filler_asset, "No decision endpoint, every break gets the filler asset");
                Arc::new(StaticDecisionSource::filler(&config.filler_asset))
            }
        };

        let (queue, jobs) = ChannelTranscodeQueue::new(config.transcode_queue_capacity);

        Ok(Self {
            channels: Arc::new(channels),
            decision_source,
            origin: Arc::new(HttpOriginSource::new(
                &config.origin_base_url,
                DEFAULT_FETCH_TIMEOUT,
            )?),
            blobs: Arc::new(HttpBlobStore::new(DEFAULT_FETCH_TIMEOUT)?),
            assets: Arc::new(InMemoryAssetStore::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            transcode_queue: Arc::new(queue),
            transcode_jobs: Some(jobs),
            events: Arc::new(TracingEventSink),
        })
    }
}

/// Service container holding all application services.
pub struct ServiceContainer {
    pub config: AppConfig,
    pub channels: Arc<StaticConfigLookup>,
    pub config_service: Arc<ConfigService>,
    pub decisions: Arc<DecisionCache>,
    pub resolver: Arc<VariantResolver>,
    pub registry: Arc<ChannelRegistry>,
    pub manifests: Arc<ManifestService>,
    origin: Arc<dyn OriginSource>,
    locks: Arc<dyn LockStore>,
    transcode_jobs: Mutex<Option<mpsc::Receiver<TranscodeJob>>>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create the production container.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let parts = ServiceParts::from_config(&config).await?;
        Self::with_parts(config, parts)
    }

    pub fn with_parts(config: AppConfig, parts: ServiceParts) -> Result<Self> {
        info!("Initializing service container");

        let cancellation_token = CancellationToken::new();

        let config_service = Arc::new(ConfigService::with_cache(
            parts.channels.clone(),
            ConfigCache::with_ttl(config.config_ttl),
        ));

        let decisions = Arc::new(
            DecisionCache::new(parts.decision_source, &config.filler_asset)
                .with_timeout(config.decision_timeout)
                .with_ttl(config.decision_ttl),
        );

        let locks = parts.locks;
        let resolver = Arc::new(
            VariantResolver::new(parts.assets, locks.clone(), parts.transcode_queue)
                .with_lock_ttl(config.lock_ttl),
        );

        let settings = ChannelActorSettings {
            pdt_window: chrono::Duration::seconds(config.pdt_window_secs),
            ..Default::default()
        };
        let registry = Arc::new(ChannelRegistry::new(
            config_service.clone(),
            decisions.clone(),
            parts.events.clone(),
            settings,
            cancellation_token.child_token(),
        ));

        let signer = match config.signing_key.as_deref() {
            Some(key) => {
                let ttl = chrono::Duration::from_std(config.signed_uri_ttl)
                    .map_err(|e| Error::config(format!("invalid signed URI ttl: {e}")))?;
                let signer = UriSigner::new(key.as_bytes(), ttl)
                    .map_err(|e| Error::config(format!("invalid signing key: {e}")))?;
                Some(signer)
            }
            None => None,
        };
        if signer.is_none() {
            info!("No signing key configured, interstitial mode is disabled");
        }

        let manifests = Arc::new(ManifestService::new(
            parts.origin.clone(),
            registry.clone(),
            config_service.clone(),
            decisions.clone(),
            resolver.clone(),
            parts.blobs,
            signer,
            &config.asset_base_url,
            parts.events,
        )?);

        info!("Service container initialized");

        Ok(Self {
            config,
            channels: parts.channels,
            config_service,
            decisions,
            resolver,
            registry,
            manifests,
            origin: parts.origin,
            locks,
            transcode_jobs: Mutex::new(parts.transcode_jobs),
            cancellation_token,
        })
    }

    /// Spawn an actor and a cue monitor for every configured channel, plus
    /// the cache maintenance loop.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        for key in self.channels.keys() {
            if let Err(e) = self.registry.get_or_spawn(&key).await {
                warn!(channel = %key, error = %e, "Failed to start channel actor");
                continue;
            }
            let monitor = SignalMonitor::new(
                key,
                self.origin.clone(),
                self.registry.clone(),
                self.config_service.clone(),
                self.cancellation_token.child_token(),
            );
            tasks.push(monitor.spawn());
        }
        info!(channels = tasks.len(), "Channel monitors started");

        tasks.push(self.spawn_maintenance());
        tasks
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let decisions = self.decisions.clone();
        let config_service = self.config_service.clone();
        let locks = self.locks.clone();
        let token = self.cancellation_token.child_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let decisions_removed = decisions.cleanup_expired();
                        let configs_removed = config_service.cache().cleanup_expired();
                        let locks_removed = locks.cleanup_expired();
                        if decisions_removed + configs_removed + locks_removed > 0 {
                            debug!(
                                decisions_removed,
                                configs_removed,
                                locks_removed,
                                "Swept expired entries"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Take the in-process transcode job receiver. Only the first call gets it.
    pub fn take_transcode_jobs(&self) -> Option<mpsc::Receiver<TranscodeJob>> {
        self.transcode_jobs.lock().take()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Cancel background tasks and wait for every channel actor to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
        let stopped = self.registry.shutdown().await;
        info!(actors = stopped, "Services stopped");
    }
}
