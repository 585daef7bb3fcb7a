//! Ad decisions: which asset fills a break.

pub mod cache;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChannelKey;
use crate::variant::Rendition;
use crate::{Error, Result};

pub use cache::{DecisionCache, DecisionKey, ResolvedDecision, viewer_bucket};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub asset_id: String,
    #[serde(default)]
    pub candidate_renditions: Vec<Rendition>,
    /// Slate played when nothing was sold or the source did not answer.
    #[serde(default)]
    pub filler: bool,
}

impl Decision {
    pub fn filler(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            candidate_renditions: Vec::new(),
            filler: true,
        }
    }
}

/// What is known about the viewer asking for a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewerContext {
    pub viewer_id: Option<String>,
    pub user_agent: Option<String>,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Something that picks an asset for a break. Callers bound it with a
/// timeout.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(
        &self,
        channel: &ChannelKey,
        break_secs: f64,
        viewer: &ViewerContext,
    ) -> Result<Decision>;
}

#[derive(Debug, Serialize)]
struct DecisionRequest<'a> {
    org: &'a str,
    channel: &'a str,
    break_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    viewer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    asset_id: Option<String>,
    #[serde(default)]
    candidate_renditions: Vec<Rendition>,
    #[serde(default)]
    filler: bool,
}

/// Decision service reached over HTTP. Posts the break as JSON and expects
/// `{asset_id, candidate_renditions}` back; a response without an asset is
/// treated as filler.
pub struct HttpDecisionSource {
    client: Client,
    url: String,
    filler_asset: String,
}

impl HttpDecisionSource {
    pub fn new(url: impl Into<String>, filler_asset: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self::with_client(client, url, filler_asset))
    }

    pub fn with_client(client: Client, url: impl Into<String>, filler_asset: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            filler_asset: filler_asset.into(),
        }
    }
}

#[async_trait]
impl DecisionSource for HttpDecisionSource {
    async fn decide(
        &self,
        channel: &ChannelKey,
        break_secs: f64,
        viewer: &ViewerContext,
    ) -> Result<Decision> {
        let request = DecisionRequest {
            org: &channel.org,
            channel: &channel.channel,
            break_seconds: break_secs,
            viewer_id: viewer.viewer_id.as_deref(),
            user_agent: viewer.user_agent.as_deref(),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!(
                "decision service returned {status} for {channel}"
            )));
        }

        let body: DecisionResponse = response.json().await?;
        match body.asset_id {
            Some(asset_id) if !body.filler => Ok(Decision {
                asset_id,
                candidate_renditions: body.candidate_renditions,
                filler: false,
            }),
            _ => {
                debug!(%channel, "Decision service answered with filler");
                Ok(Decision::filler(&self.filler_asset))
            }
        }
    }
}

/// In-memory decisions per channel, with a fallback for channels that have
/// none. Used when no decision service is configured.
pub struct StaticDecisionSource {
    decisions: RwLock<HashMap<ChannelKey, Decision>>,
    fallback: Decision,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticDecisionSource {
    pub fn new(fallback: Decision) -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn filler(asset_id: impl Into<String>) -> Self {
        Self::new(Decision::filler(asset_id))
    }

    /// Answer only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, channel: ChannelKey, decision: Decision) {
        self.decisions.write().insert(channel, decision);
    }

    /// Number of `decide` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DecisionSource for StaticDecisionSource {
    async fn decide(
        &self,
        channel: &ChannelKey,
        _break_secs: f64,
        _viewer: &ViewerContext,
    ) -> Result<Decision> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let decision = self.decisions.read().get(channel).cloned();
        Ok(decision.unwrap_or_else(|| self.fallback.clone()))
    }
}
