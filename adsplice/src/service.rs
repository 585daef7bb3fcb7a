//! Viewer manifest generation.
//!
//! Reads the channel's state through a snapshot and only reports back to the
//! actor with advisory messages. Every failure after the origin fetch falls
//! back to the origin playlist.

use std::sync::Arc;

use chrono::Utc;
use hls_splice::{
    AdPlaylist, DEFAULT_DURATION_SAMPLE, InsertionMode, SkipReason, SpliceOutcome, UriSigner,
    insert_interstitial, select_mode, splice_ad_break,
};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::blob::BlobStore;
use crate::channel::{ChannelMessage, ChannelRegistry, SpliceProgress};
use crate::config::{ChannelKey, ConfigService};
use crate::decision::{DecisionCache, ViewerContext};
use crate::events::{AdEvent, EventSink};
use crate::origin::OriginSource;
use crate::variant::{Resolution, VariantResolver};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ManifestRequest {
    pub key: ChannelKey,
    pub variant: String,
    /// Test override of the insertion mode.
    pub force: Option<InsertionMode>,
    pub viewer: ViewerContext,
}

impl ManifestRequest {
    pub fn new(key: ChannelKey, variant: impl Into<String>) -> Self {
        Self {
            key,
            variant: variant.into(),
            force: None,
            viewer: ViewerContext::anonymous(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServedManifest {
    pub body: String,
    /// Set when an ad break was active for this request.
    pub mode: Option<InsertionMode>,
    pub outcome: Option<SpliceOutcome>,
}

impl ServedManifest {
    fn passthrough(body: String) -> Self {
        Self {
            body,
            mode: None,
            outcome: None,
        }
    }
}

/// Kbps encoded in a variant name such as `1600k.m3u8`.
pub fn variant_bitrate(variant: &str) -> Option<u32> {
    let stem = variant.rsplit('/').next()?;
    let stem = stem.strip_suffix(".m3u8").unwrap_or(stem);
    let digits = stem
        .strip_suffix('k')
        .or_else(|| stem.strip_suffix('K'))
        .unwrap_or(stem);
    digits.parse().ok()
}

pub struct ManifestService {
    origin: Arc<dyn OriginSource>,
    registry: Arc<ChannelRegistry>,
    config: Arc<ConfigService>,
    decisions: Arc<DecisionCache>,
    resolver: Arc<VariantResolver>,
    blobs: Arc<dyn BlobStore>,
    signer: Option<UriSigner>,
    asset_base: Url,
    events: Arc<dyn EventSink>,
    duration_sample: usize,
}

impl ManifestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        origin: Arc<dyn OriginSource>,
        registry: Arc<ChannelRegistry>,
        config: Arc<ConfigService>,
        decisions: Arc<DecisionCache>,
        resolver: Arc<VariantResolver>,
        blobs: Arc<dyn BlobStore>,
        signer: Option<UriSigner>,
        asset_base_url: &str,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut asset_base = Url::parse(asset_base_url)
            .map_err(|e| Error::config(format!("invalid asset base url {asset_base_url}: {e}")))?;
        if !asset_base.path().ends_with('/') {
            let path = format!("{}/", asset_base.path());
            asset_base.set_path(&path);
        }
        Ok(Self {
            origin,
            registry,
            config,
            decisions,
            resolver,
            blobs,
            signer,
            asset_base,
            events,
            duration_sample: DEFAULT_DURATION_SAMPLE,
        })
    }

    /// Signer for interstitial asset URIs. `None` disables interstitials.
    pub fn signer(&self) -> Option<&UriSigner> {
        self.signer.as_ref()
    }

    /// Serve a viewer manifest. Only an origin failure is an error.
    pub async fn serve(&self, req: &ManifestRequest) -> Result<ServedManifest> {
        let origin = self.origin.media_playlist(&req.key, &req.variant).await?;

        match self.condition(req, &origin).await {
            Ok(Some((mode, outcome, body))) => Ok(ServedManifest {
                body,
                mode: Some(mode),
                outcome: Some(outcome),
            }),
            Ok(None) => Ok(ServedManifest::passthrough(origin)),
            Err(e) => {
                warn!(channel = %req.key, variant = %req.variant, error = %e, "Ad path failed, serving origin");
                Ok(ServedManifest::passthrough(origin))
            }
        }
    }

    async fn condition(
        &self,
        req: &ManifestRequest,
        origin: &str,
    ) -> Result<Option<(InsertionMode, SpliceOutcome, String)>> {
        let Some(config) = self.config.get_channel_config(&req.key).await? else {
            return Ok(None);
        };
        let snapshot = self.registry.snapshot(&req.key).await?;
        let now = Utc::now();
        let Some(target) = snapshot.splice_target() else {
            return Ok(None);
        };
        let (window, actor_decision) = (target.window, target.decision);

        let decision = if req.viewer.viewer_id.is_some() {
            self.decisions
                .resolve(&config, window.duration_secs, &req.viewer)
                .await
                .decision
        } else {
            actor_decision.clone()
        };

        let mode = match select_mode(req.force, config.mode, req.viewer.user_agent.as_deref()) {
            InsertionMode::Sgai if self.signer.is_none() => {
                debug!(channel = %req.key, "No signing key, using SSAI instead of interstitials");
                InsertionMode::Ssai
            }
            mode => mode,
        };
        let brk = window.as_ad_break();

        let conditioned = match (mode, &self.signer) {
            (InsertionMode::Sgai, Some(signer)) => {
                let asset_uri = self.asset_url(&decision.asset_id, "master.m3u8")?;
                let signed = signer.sign(asset_uri.as_str(), now)?;
                insert_interstitial(origin, &brk, &signed, self.duration_sample)
            }
            _ => {
                let resolution = self.resolver.resolve(&decision, &config.bitrate_ladder).await;
                self.report_transcode(&req.key, &resolution);

                let Some(rendition) = resolution.rendition_for(variant_bitrate(&req.variant)) else {
                    debug!(channel = %req.key, asset_id = %decision.asset_id, "No rendition available");
                    return Ok(None);
                };
                let ad_url = self.asset_url(&decision.asset_id, &rendition.playlist_uri)?;
                let body = self.blobs.fetch_text(ad_url.as_str()).await?;
                let ad = AdPlaylist::parse(&body, ad_url.as_str())?;
                splice_ad_break(origin, &brk, &ad, self.duration_sample)
            }
        };

        match &conditioned.outcome {
            SpliceOutcome::Skipped { reason } => {
                debug!(channel = %req.key, break_id = %brk.id, %reason, "Splice skipped");
                if target.ended
                    && matches!(reason, SkipReason::BreakBeforeWindow | SkipReason::AnchorNotInWindow)
                {
                    self.notify_actor(
                        &req.key,
                        ChannelMessage::RetireBreak {
                            break_id: brk.id.clone(),
                        },
                    );
                }
                self.events.emit(AdEvent::SpliceSkipped {
                    channel: req.key.clone(),
                    variant: req.variant.clone(),
                    break_id: brk.id.clone(),
                    reason: *reason,
                });
            }
            SpliceOutcome::Spliced(report) => {
                if !target.ended {
                    let progress = SpliceProgress {
                        segment_duration: report.segment_duration,
                        skipped_segments: report.skipped_segments,
                        remaining_skip: report.remaining_skip,
                        reported_at: now,
                    };
                    self.notify_actor(&req.key, ChannelMessage::SpliceProgress(progress));
                }
            }
            SpliceOutcome::Interstitial { .. } => {}
        }

        let outcome = conditioned.outcome.clone();
        Ok(Some((mode, outcome, conditioned.into_owned())))
    }

    /// Advisory messages never wait on the mailbox.
    fn notify_actor(&self, key: &ChannelKey, msg: ChannelMessage) {
        if let Some(handle) = self.registry.get(key) {
            handle.offer(msg);
        }
    }

    fn report_transcode(&self, key: &ChannelKey, resolution: &Resolution) {
        if let Some(job_id) = resolution.transcode.job_id() {
            self.events.emit(AdEvent::TranscodeEnqueued {
                channel: key.clone(),
                asset_id: resolution.asset_id.clone(),
                job_id,
                bitrates: resolution.missing_bitrates.clone(),
            });
        }
    }

    /// `path` under the asset's directory. Absolute URLs pass through.
    fn asset_url(&self, asset_id: &str, path: &str) -> Result<Url> {
        self.asset_base
            .join(&format!("{asset_id}/"))
            .and_then(|dir| dir.join(path))
            .map_err(|e| Error::validation(format!("invalid asset path {asset_id}/{path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_bitrate() {
        assert_eq!(variant_bitrate("1600k.m3u8"), Some(1600));
        assert_eq!(variant_bitrate("800K.m3u8"), Some(800));
        assert_eq!(variant_bitrate("video/2400k.m3u8"), Some(2400));
        assert_eq!(variant_bitrate("2400"), Some(2400));
        assert_eq!(variant_bitrate("high.m3u8"), None);
    }
}
