//! Registry of running channel actors.
//!
//! Actors are spawned lazily on first use of a channel key, tracked in a
//! `JoinSet`, and cancelled together on shutdown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::actor::{ActorOutcome, ChannelActor, ChannelActorSettings};
use super::handle::ActorHandle;
use super::messages::ChannelMessage;
use super::state::ChannelSnapshot;
use crate::config::{ChannelConfig, ChannelKey, ConfigService};
use crate::decision::DecisionCache;
use crate::events::EventSink;
use crate::{Error, Result};

/// How long a snapshot request may take before the caller gives up.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(250);

pub struct ChannelRegistry {
    actors: DashMap<ChannelKey, ActorHandle<ChannelMessage>>,
    tasks: Mutex<JoinSet<(ChannelKey, ActorOutcome)>>,
    config: Arc<ConfigService>,
    decisions: Arc<DecisionCache>,
    events: Arc<dyn EventSink>,
    settings: ChannelActorSettings,
    cancellation_token: CancellationToken,
}

impl ChannelRegistry {
    pub fn new(
        config: Arc<ConfigService>,
        decisions: Arc<DecisionCache>,
        events: Arc<dyn EventSink>,
        settings: ChannelActorSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            actors: DashMap::new(),
            tasks: Mutex::new(JoinSet::new()),
            config,
            decisions,
            events,
            settings,
            cancellation_token,
        }
    }

    /// Handle for `key`, spawning its actor if none is running. Fails with
    /// [`Error::ChannelNotFound`] for unconfigured channels.
    pub async fn get_or_spawn(&self, key: &ChannelKey) -> Result<ActorHandle<ChannelMessage>> {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let config = self
            .config
            .get_channel_config(key)
            .await?
            .ok_or_else(|| Error::channel_not_found(key))?;

        let handle = match self.actors.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_closed() {
                    let handle = self.spawn(config);
                    existing.insert(handle.clone());
                    handle
                } else {
                    existing.get().clone()
                }
            }
            Entry::Vacant(slot) => {
                let handle = self.spawn(config);
                slot.insert(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    fn spawn(&self, config: Arc<ChannelConfig>) -> ActorHandle<ChannelMessage> {
        let key = config.key();
        let (actor, handle) = ChannelActor::new(
            config,
            self.decisions.clone(),
            self.events.clone(),
            self.settings.clone(),
            self.cancellation_token.child_token(),
        );
        info!("Spawning channel actor {}", key);
        self.tasks
            .lock()
            .spawn(async move { (key, actor.run().await) });
        handle
    }

    /// Handle of a running actor, if any.
    pub fn get(&self, key: &ChannelKey) -> Option<ActorHandle<ChannelMessage>> {
        self.actors
            .get(key)
            .filter(|h| !h.is_closed())
            .map(|h| h.value().clone())
    }

    /// Read-only view of the channel's state.
    pub async fn snapshot(&self, key: &ChannelKey) -> Result<ChannelSnapshot> {
        let handle = self.get_or_spawn(key).await?;
        Ok(handle
            .request(ChannelMessage::Snapshot, DEFAULT_SNAPSHOT_TIMEOUT)
            .await?)
    }

    /// Deliver `msg`, spawning the actor if needed.
    pub async fn send(&self, key: &ChannelKey, msg: ChannelMessage) -> Result<()> {
        let handle = self.get_or_spawn(key).await?;
        Ok(handle.send(msg).await?)
    }

    /// Stop and forget the actor for `key`.
    pub fn remove(&self, key: &ChannelKey) -> bool {
        match self.actors.remove(key) {
            Some((_, handle)) => {
                if handle.try_send(ChannelMessage::Stop).is_err() {
                    handle.cancel();
                }
                debug!("Removed channel actor {}", key);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.actors.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Cancel every actor and wait for them to finish.
    pub async fn shutdown(&self) -> usize {
        self.cancellation_token.cancel();
        self.actors.clear();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());

        let mut finished = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((key, outcome)) => debug!("Channel actor {} finished: {:?}", key, outcome),
                Err(e) => warn!("Channel actor task failed: {}", e),
            }
            finished += 1;
        }
        info!("Channel registry shut down, {} actors stopped", finished);
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigLookup;
    use crate::decision::StaticDecisionSource;
    use crate::events::TracingEventSink;

    fn registry() -> ChannelRegistry {
        let key = ChannelKey::new("acme", "news");
        let lookup = Arc::new(StaticConfigLookup::new([ChannelConfig::new(&key)]));
        ChannelRegistry::new(
            Arc::new(ConfigService::new(lookup)),
            Arc::new(DecisionCache::new(
                Arc::new(StaticDecisionSource::filler("slate")),
                "slate",
            )),
            Arc::new(TracingEventSink),
            ChannelActorSettings::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_spawns_once_per_channel() {
        let registry = registry();
        let key = ChannelKey::new("acme", "news");

        let a = registry.get_or_spawn(&key).await.unwrap();
        let b = registry.get_or_spawn(&key).await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(), 1);

        let snapshot = registry.snapshot(&key).await.unwrap();
        assert!(snapshot.phase.is_idle());
        assert_eq!(registry.shutdown().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_not_found() {
        let registry = registry();
        let err = registry
            .get_or_spawn(&ChannelKey::new("acme", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_then_respawn() {
        let registry = registry();
        let key = ChannelKey::new("acme", "news");
        registry.get_or_spawn(&key).await.unwrap();

        assert!(registry.remove(&key));
        assert!(!registry.remove(&key));
        assert!(registry.get(&key).is_none());

        registry.get_or_spawn(&key).await.unwrap();
        assert_eq!(registry.keys(), vec![key]);
        assert_eq!(registry.shutdown().await, 2);
    }
}
