//! Server-side ad splicing.
//!
//! Content segments displaced by the break are replaced in the playlist by
//! the ad rendition's real segments. The ad run is bracketed by
//! discontinuities and every emitted segment carries a program-date-time that
//! continues exactly from the previous one.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use m3u8_rs::parse_playlist_res;
use tracing::debug;
use url::Url;

use crate::duration::{compute_skip_count, detect_segment_duration};
use crate::error::SpliceError;
use crate::playlist::{
    Playlist, TAG_DISCONTINUITY, TAG_PROGRAM_DATE_TIME, format_pdt, secs_to_duration,
};
use crate::splice::{AdBreak, Conditioned, SkipReason, SpliceOutcome, SpliceReport, find_anchor};
use crate::Result;

/// Ad segments may overrun the break by at most this much.
const FIT_EPSILON_SECS: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub struct AdSegment {
    pub uri: String,
    pub duration: f64,
}

/// Segment list of one ad rendition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdPlaylist {
    pub segments: Vec<AdSegment>,
}

impl AdPlaylist {
    /// Parse the ad rendition's media playlist and resolve segment URIs
    /// against the playlist's own URL.
    pub fn parse(body: &str, playlist_url: &str) -> Result<Self> {
        let base = Url::parse(playlist_url).map_err(|source| SpliceError::InvalidUrl {
            input: playlist_url.to_string(),
            source,
        })?;

        let playlist = match parse_playlist_res(body.as_bytes()) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => pl,
            Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => {
                return Err(SpliceError::ad_playlist(format!(
                    "expected media playlist, got master for {playlist_url}"
                )));
            }
            Err(e) => {
                return Err(SpliceError::ad_playlist(format!(
                    "failed to parse {playlist_url}: {e}"
                )));
            }
        };

        let segments = playlist
            .segments
            .iter()
            .map(|seg| -> Result<AdSegment> {
                let uri = base.join(&seg.uri).map_err(|source| SpliceError::InvalidUrl {
                    input: seg.uri.clone(),
                    source,
                })?;
                Ok(AdSegment {
                    uri: uri.to_string(),
                    // EXTINF comes back as f32
                    duration: (seg.duration as f64 * 1000.0).round() / 1000.0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(playlist_url, segments = segments.len(), "parsed ad playlist");

        Ok(Self { segments })
    }

    pub fn total_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Leading segments whose total fits within `limit_secs`.
    fn fitting(&self, limit_secs: f64) -> &[AdSegment] {
        let mut total = 0.0;
        let count = self
            .segments
            .iter()
            .take_while(|s| {
                total += s.duration;
                total <= limit_secs + FIT_EPSILON_SECS
            })
            .count();
        &self.segments[..count]
    }
}

/// Replace the content displaced by `brk` with `ad`.
///
/// Returns the input unchanged when no safe anchor exists in this window.
pub fn splice_ad_break<'a>(
    manifest: &'a str,
    brk: &AdBreak,
    ad: &AdPlaylist,
    duration_sample: usize,
) -> Conditioned<'a> {
    let playlist = Playlist::parse(manifest);

    if !(brk.duration_secs.is_finite() && brk.duration_secs > 0.0) {
        return Conditioned::unchanged(manifest, SkipReason::NonPositiveBreak);
    }
    let Some(segment_secs) = detect_segment_duration(&playlist, duration_sample) else {
        return Conditioned::unchanged(manifest, SkipReason::NoSegmentDuration);
    };
    let anchor = match find_anchor(&playlist, brk.start, segment_secs) {
        Ok(anchor) => anchor,
        Err(reason) => {
            debug!(break_id = %brk.id, %reason, "SSAI splice skipped");
            return Conditioned::unchanged(manifest, reason);
        }
    };

    let fitted = ad.fitting(brk.duration_secs);
    if fitted.is_empty() {
        let reason = if ad.segments.is_empty() {
            SkipReason::EmptyAdPlaylist
        } else {
            SkipReason::AdLongerThanBreak
        };
        return Conditioned::unchanged(manifest, reason);
    }

    let segments = playlist.segments();
    let lines = playlist.lines();
    let nl = playlist.newline();
    let skip = compute_skip_count(brk.duration_secs, segment_secs);
    let resume = (anchor + skip).min(segments.len());
    let anchor_seg = &segments[anchor];
    let Some(anchor_pdt) = anchor_seg.start else {
        return Conditioned::unchanged(manifest, SkipReason::NoProgramDateTime);
    };

    let mut out = String::with_capacity(manifest.len() + fitted.len() * 160);
    for line in &lines[..anchor_seg.first_line] {
        out.push_str(line);
    }
    ensure_newline(&mut out, nl);

    out.push_str(&format!("#{TAG_DISCONTINUITY}{nl}"));
    let mut pdt = anchor_pdt;
    let mut ad_seconds = 0.0;
    for seg in fitted {
        push_segment(&mut out, nl, pdt, seg.duration, &seg.uri);
        pdt += secs_to_duration(seg.duration);
        ad_seconds += seg.duration;
    }
    out.push_str(&format!("#{TAG_DISCONTINUITY}{nl}"));

    if let Some(resumed) = segments.get(resume) {
        // Content after the break is shifted so it continues from the last ad.
        let shift = resumed.start.map_or(chrono::Duration::zero(), |s| pdt - s);
        let rewritten: HashMap<usize, DateTime<Utc>> = segments[resume..]
            .iter()
            .filter_map(|s| Some((s.pdt_line?, s.start? + shift)))
            .collect();

        if resumed.pdt_line.is_none() {
            out.push_str(&format!("#{TAG_PROGRAM_DATE_TIME}:{}{nl}", format_pdt(pdt)));
        }
        for (idx, line) in lines.iter().enumerate().skip(resumed.first_line) {
            if let Some(at) = rewritten.get(&idx) {
                out.push_str(&format!("#{TAG_PROGRAM_DATE_TIME}:{}", format_pdt(*at)));
                out.push_str(line_ending(line));
            } else if idx < resumed.uri_line && is_tag(line, TAG_DISCONTINUITY) {
                // Already closed by the discontinuity above.
                continue;
            } else {
                out.push_str(line);
            }
        }
    } else if let Some(last) = segments.last() {
        for line in &lines[last.uri_line + 1..] {
            out.push_str(line);
        }
    }

    let skipped_segments = resume - anchor;
    let report = SpliceReport {
        anchor_uri: anchor_seg.uri.to_string(),
        anchor_pdt,
        segment_duration: segment_secs,
        skipped_segments,
        remaining_skip: skip - skipped_segments,
        ad_segments: fitted.len(),
        ad_seconds: (ad_seconds * 1000.0_f64).round() / 1000.0,
    };
    debug!(
        break_id = %brk.id,
        anchor = %report.anchor_uri,
        skipped = report.skipped_segments,
        remaining = report.remaining_skip,
        ad_segments = report.ad_segments,
        "SSAI break spliced"
    );

    Conditioned {
        manifest: Cow::Owned(out),
        outcome: SpliceOutcome::Spliced(report),
    }
}

fn push_segment(out: &mut String, nl: &str, pdt: DateTime<Utc>, duration: f64, uri: &str) {
    out.push_str(&format!("#{TAG_PROGRAM_DATE_TIME}:{}{nl}", format_pdt(pdt)));
    out.push_str(&format!("#EXTINF:{duration:.3},{nl}"));
    out.push_str(uri);
    out.push_str(nl);
}

fn ensure_newline(out: &mut String, nl: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(nl);
    }
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

fn is_tag(line: &str, name: &str) -> bool {
    line.trim()
        .strip_prefix('#')
        .is_some_and(|t| t == name || t.starts_with(&format!("{name}:")))
}
