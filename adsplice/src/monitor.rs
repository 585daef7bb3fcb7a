//! Background cue ingestion.
//!
//! A [`SignalMonitor`] polls one rendition of a channel at half the target
//! duration, pulls cue tags out of each segment's tag block and forwards the
//! new ones to the channel actor.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use hls_splice::Playlist;
use scte35::{CueKind, CueSignal, CueSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ChannelMessage, ChannelRegistry};
use crate::config::{ChannelKey, ConfigService};
use crate::origin::OriginSource;

/// Poll interval when the playlist has no usable target duration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cue line identities remembered between polls.
const SEEN_LIMIT: usize = 1024;

/// Half the playlist's target duration, at least [`MIN_POLL_INTERVAL`].
pub fn poll_interval(playlist: &Playlist<'_>) -> Duration {
    match playlist.target_duration() {
        Some(target) if target > 0 => {
            Duration::from_millis(target * 500).max(MIN_POLL_INTERVAL)
        }
        _ => DEFAULT_POLL_INTERVAL,
    }
}

/// Finds cues that have not been seen in earlier polls. A cue line is
/// identified by the URI of the segment it precedes plus the line itself.
#[derive(Debug, Default)]
pub struct CueExtractor {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl CueExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&mut self, playlist: &Playlist<'_>) -> Vec<CueSignal> {
        let lines = playlist.lines();
        let mut found = Vec::new();

        for seg in playlist.segments() {
            let mut block: Vec<CueSignal> = Vec::new();
            for raw in &lines[seg.first_line..seg.uri_line] {
                let line = raw.trim();
                if !scte35::is_cue_tag(line) {
                    continue;
                }
                let identity = format!("{}|{}", seg.uri, line);
                if !self.remember(identity) {
                    continue;
                }
                match scte35::parse_tag_line(line) {
                    Ok(signal) if signal.kind() == CueKind::Continuation => {}
                    Ok(signal) => block.push(match seg.start {
                        Some(start) => signal.with_start_pdt(start),
                        None => signal,
                    }),
                    Err(e) => debug!(segment = seg.uri, error = %e, "Skipping undecodable cue tag"),
                }
            }

            // A binary section and its attribute rendering describe one event.
            if block.iter().any(|s| s.source() == CueSource::BinaryDecoded) {
                block.retain(|s| s.source() == CueSource::BinaryDecoded);
            }
            found.extend(block);
        }
        found
    }

    /// Returns `false` if `identity` was already seen.
    fn remember(&mut self, identity: String) -> bool {
        if self.seen.contains(&identity) {
            return false;
        }
        if self.order.len() == SEEN_LIMIT
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(identity.clone());
        self.order.push_back(identity);
        true
    }
}

pub struct SignalMonitor {
    id: String,
    key: ChannelKey,
    origin: Arc<dyn OriginSource>,
    registry: Arc<ChannelRegistry>,
    config: Arc<ConfigService>,
    extractor: CueExtractor,
    cancellation_token: CancellationToken,
}

impl SignalMonitor {
    pub fn new(
        key: ChannelKey,
        origin: Arc<dyn OriginSource>,
        registry: Arc<ChannelRegistry>,
        config: Arc<ConfigService>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id: key.to_string(),
            key,
            origin,
            registry,
            config,
            extractor: CueExtractor::new(),
            cancellation_token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("SignalMonitor {} starting", self.id);

        loop {
            let wait = self.poll_once().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancellation_token.cancelled() => break,
            }
        }

        info!("SignalMonitor {} stopped", self.id);
    }

    /// One poll. Returns how long to wait before the next.
    pub async fn poll_once(&mut self) -> Duration {
        let variant = match self.config.get_channel_config(&self.key).await {
            Ok(Some(config)) => config.signal_variant(),
            Ok(None) => {
                warn!("SignalMonitor {} has no channel config", self.id);
                return DEFAULT_POLL_INTERVAL;
            }
            Err(e) => {
                warn!("SignalMonitor {} config lookup failed: {}", self.id, e);
                return DEFAULT_POLL_INTERVAL;
            }
        };
        let Some(variant) = variant else {
            debug!("SignalMonitor {} has no signal variant", self.id);
            return DEFAULT_POLL_INTERVAL;
        };

        let body = match self.origin.media_playlist(&self.key, &variant).await {
            Ok(body) => body,
            Err(e) => {
                warn!("SignalMonitor {} fetch of {} failed: {}", self.id, variant, e);
                return DEFAULT_POLL_INTERVAL;
            }
        };

        let (cues, wait) = {
            let playlist = Playlist::parse(&body);
            (self.extractor.extract(&playlist), poll_interval(&playlist))
        };

        for cue in cues {
            debug!("SignalMonitor {} forwarding cue {}", self.id, cue.id());
            if let Err(e) = self.registry.send(&self.key, ChannelMessage::Cue(cue)).await {
                warn!("SignalMonitor {} could not deliver cue: {}", self.id, e);
            }
        }
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:100\n\
#EXT-X-PROGRAM-DATE-TIME:2026-03-01T12:00:00.000Z\n\
#EXTINF:6.000,\n\
seg100.ts\n\
#EXT-X-CUE-OUT:30\n\
#EXTINF:6.000,\n\
seg101.ts\n\
#EXT-X-CUE-OUT-CONT:6/30\n\
#EXTINF:6.000,\n\
seg102.ts\n";

    #[test]
    fn test_poll_interval_is_half_target() {
        assert_eq!(poll_interval(&Playlist::parse(LIVE)), Duration::from_secs(3));
        assert_eq!(
            poll_interval(&Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:1\n")),
            MIN_POLL_INTERVAL
        );
        assert_eq!(poll_interval(&Playlist::parse("#EXTM3U\n")), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_extracts_new_cues_once() {
        let mut extractor = CueExtractor::new();
        let cues = extractor.extract(&Playlist::parse(LIVE));
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].kind(), CueKind::BreakStart);
        assert_eq!(
            cues[0].start_pdt().unwrap().to_rfc3339(),
            "2026-03-01T12:00:06+00:00"
        );

        assert!(extractor.extract(&Playlist::parse(LIVE)).is_empty());
    }

    #[test]
    fn test_binary_cue_wins_within_block() {
        let playlist = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-CUE-OUT:60.293\n\
#EXT-OATCLS-SCTE35:/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=\n\
#EXTINF:6.000,\n\
seg1.ts\n";
        let cues = CueExtractor::new().extract(&Playlist::parse(playlist));
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].source(), CueSource::BinaryDecoded);
        assert_eq!(cues[0].event_id(), Some(0x4800_008F));
    }

    #[test]
    fn test_seen_set_is_bounded() {
        let mut extractor = CueExtractor::new();
        for i in 0..(SEEN_LIMIT + 5) {
            assert!(extractor.remember(format!("seg{i}.ts|#EXT-X-CUE-IN")));
        }
        assert_eq!(extractor.seen.len(), SEEN_LIMIT);
        assert!(extractor.remember("seg0.ts|#EXT-X-CUE-IN".to_string()));
    }
}
