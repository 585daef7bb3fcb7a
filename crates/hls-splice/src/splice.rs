//! Shared splice types and anchor selection.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::playlist::{Playlist, secs_to_duration};

/// The break being inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct AdBreak {
    pub id: String,
    pub start: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Why a playlist was returned untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoProgramDateTime,
    NoSegmentDuration,
    NonPositiveBreak,
    /// The break started before the oldest segment in the window.
    BreakBeforeWindow,
    /// No segment at or after the break start is in the window yet.
    AnchorNotInWindow,
    EmptyAdPlaylist,
    /// The first ad segment alone is longer than the break.
    AdLongerThanBreak,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoProgramDateTime => "no_program_date_time",
            SkipReason::NoSegmentDuration => "no_segment_duration",
            SkipReason::NonPositiveBreak => "non_positive_break",
            SkipReason::BreakBeforeWindow => "break_before_window",
            SkipReason::AnchorNotInWindow => "anchor_not_in_window",
            SkipReason::EmptyAdPlaylist => "empty_ad_playlist",
            SkipReason::AdLongerThanBreak => "ad_longer_than_break",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpliceReport {
    pub anchor_uri: String,
    pub anchor_pdt: DateTime<Utc>,
    pub segment_duration: f64,
    /// Content segments removed from this window.
    pub skipped_segments: usize,
    /// Displaced segments not yet in the window.
    pub remaining_skip: usize,
    pub ad_segments: usize,
    pub ad_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpliceOutcome {
    Spliced(SpliceReport),
    Interstitial {
        anchor_uri: String,
        start: DateTime<Utc>,
        duration_secs: f64,
    },
    Skipped { reason: SkipReason },
}

/// A conditioned playlist. `manifest` borrows the input on every skip path.
#[derive(Debug, Clone)]
pub struct Conditioned<'a> {
    pub manifest: Cow<'a, str>,
    pub outcome: SpliceOutcome,
}

impl<'a> Conditioned<'a> {
    pub(crate) fn unchanged(source: &'a str, reason: SkipReason) -> Self {
        Self {
            manifest: Cow::Borrowed(source),
            outcome: SpliceOutcome::Skipped { reason },
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self.manifest, Cow::Owned(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.outcome {
            SpliceOutcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn into_owned(self) -> String {
        self.manifest.into_owned()
    }
}

/// Index of the first segment whose start is at or after `break_start`,
/// within half a segment.
pub(crate) fn find_anchor(
    playlist: &Playlist<'_>,
    break_start: DateTime<Utc>,
    segment_secs: f64,
) -> Result<usize, SkipReason> {
    let tolerance = secs_to_duration(segment_secs / 2.0);
    let mut timed = playlist
        .segments()
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.start.map(|start| (i, start)))
        .peekable();

    let Some(&(_, first_start)) = timed.peek() else {
        return Err(SkipReason::NoProgramDateTime);
    };
    if break_start + tolerance < first_start {
        return Err(SkipReason::BreakBeforeWindow);
    }

    timed
        .find(|(_, start)| *start + tolerance >= break_start)
        .map(|(i, _)| i)
        .ok_or(SkipReason::AnchorNotInWindow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::parse_pdt;
    use crate::playlist::tests::live_playlist;

    fn at(s: &str) -> DateTime<Utc> {
        parse_pdt(s).unwrap()
    }

    #[test]
    fn anchor_on_exact_boundary() {
        let src = live_playlist(6, 6.0);
        let pl = Playlist::parse(&src);
        assert_eq!(find_anchor(&pl, at("2026-03-01T12:00:12Z"), 6.0), Ok(2));
        assert_eq!(find_anchor(&pl, at("2026-03-01T12:00:00Z"), 6.0), Ok(0));
    }

    #[test]
    fn anchor_within_half_segment() {
        let src = live_playlist(6, 6.0);
        let pl = Playlist::parse(&src);
        // 1 s into segment 2 snaps back to it, 4 s in moves to segment 3.
        assert_eq!(find_anchor(&pl, at("2026-03-01T12:00:13Z"), 6.0), Ok(2));
        assert_eq!(find_anchor(&pl, at("2026-03-01T12:00:16Z"), 6.0), Ok(3));
    }

    #[test]
    fn break_outside_window() {
        let src = live_playlist(6, 6.0);
        let pl = Playlist::parse(&src);
        assert_eq!(
            find_anchor(&pl, at("2026-03-01T11:59:00Z"), 6.0),
            Err(SkipReason::BreakBeforeWindow)
        );
        assert_eq!(
            find_anchor(&pl, at("2026-03-01T12:01:00Z"), 6.0),
            Err(SkipReason::AnchorNotInWindow)
        );
    }

    #[test]
    fn no_pdt_is_no_anchor() {
        let pl = Playlist::parse("#EXTM3U\n#EXTINF:6.0,\na.ts\n");
        assert_eq!(
            find_anchor(&pl, at("2026-03-01T12:00:00Z"), 6.0),
            Err(SkipReason::NoProgramDateTime)
        );
    }
}
