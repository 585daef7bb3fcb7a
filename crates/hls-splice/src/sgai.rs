//! Server-guided interstitials.
//!
//! Content segments are left alone; a single interstitial `#EXT-X-DATERANGE`
//! is placed in front of the anchor segment and the player fetches the ad
//! asset itself.

use std::borrow::Cow;

use tracing::debug;

use crate::duration::detect_segment_duration;
use crate::playlist::{Playlist, format_pdt};
use crate::splice::{AdBreak, Conditioned, SkipReason, SpliceOutcome, find_anchor};

pub const INTERSTITIAL_CLASS: &str = "com.apple.hls.interstitial";
const RESTRICT: &str = "SKIP,JUMP";

/// Render the interstitial tag for `brk` starting at `start`.
pub fn interstitial_tag(brk: &AdBreak, start: chrono::DateTime<chrono::Utc>, asset_uri: &str) -> String {
    format!(
        "#EXT-X-DATERANGE:ID=\"{id}\",CLASS=\"{INTERSTITIAL_CLASS}\",START-DATE=\"{start}\",\
         DURATION={secs:.3},X-ASSET-URI=\"{asset_uri}\",X-RESUME-OFFSET={secs:.3},X-RESTRICT=\"{RESTRICT}\"",
        id = brk.id,
        start = format_pdt(start),
        secs = brk.duration_secs,
    )
}

/// Insert an interstitial for `brk` pointing at `asset_uri`, which should
/// already be signed.
pub fn insert_interstitial<'a>(
    manifest: &'a str,
    brk: &AdBreak,
    asset_uri: &str,
    duration_sample: usize,
) -> Conditioned<'a> {
    if !(brk.duration_secs.is_finite() && brk.duration_secs > 0.0) {
        return Conditioned::unchanged(manifest, SkipReason::NonPositiveBreak);
    }
    let playlist = Playlist::parse(manifest);
    let Some(segment_secs) = detect_segment_duration(&playlist, duration_sample) else {
        return Conditioned::unchanged(manifest, SkipReason::NoSegmentDuration);
    };
    let anchor = match find_anchor(&playlist, brk.start, segment_secs) {
        Ok(anchor) => anchor,
        Err(reason) => {
            debug!(break_id = %brk.id, %reason, "interstitial skipped");
            return Conditioned::unchanged(manifest, reason);
        }
    };

    let segment = &playlist.segments()[anchor];
    let Some(start) = segment.start else {
        return Conditioned::unchanged(manifest, SkipReason::NoProgramDateTime);
    };
    let lines = playlist.lines();
    let nl = playlist.newline();

    let tag = interstitial_tag(brk, start, asset_uri);
    let mut out = String::with_capacity(manifest.len() + tag.len() + 2);
    for line in &lines[..segment.first_line] {
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(nl);
    }
    out.push_str(&tag);
    out.push_str(nl);
    for line in &lines[segment.first_line..] {
        out.push_str(line);
    }

    debug!(break_id = %brk.id, anchor = segment.uri, "interstitial inserted");
    Conditioned {
        manifest: Cow::Owned(out),
        outcome: SpliceOutcome::Interstitial {
            anchor_uri: segment.uri.to_string(),
            start,
            duration_secs: brk.duration_secs,
        },
    }
}
