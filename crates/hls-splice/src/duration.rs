//! Segment duration detection and skip counting.

use crate::playlist::Playlist;

/// How many leading `#EXTINF` values are averaged by default.
pub const DEFAULT_DURATION_SAMPLE: usize = 6;

/// Tolerance applied before rounding up a skip count.
const SKIP_EPSILON_SECS: f64 = 0.001;

/// Average of the first `sample` declared segment durations, rounded to
/// milliseconds.
///
/// Returns `None` when no `#EXTINF` parses. `#EXT-X-TARGETDURATION` is an
/// upper bound, not a duration, and is never used as a fallback.
pub fn detect_segment_duration(playlist: &Playlist<'_>, sample: usize) -> Option<f64> {
    let durations: Vec<f64> = playlist
        .segments()
        .iter()
        .filter_map(|s| s.duration)
        .filter(|d| *d > 0.0)
        .take(sample.max(1))
        .collect();
    if durations.is_empty() {
        return None;
    }
    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    Some((avg * 1000.0).round() / 1000.0)
}

/// Number of content segments an ad break of `break_secs` displaces.
pub fn compute_skip_count(break_secs: f64, segment_secs: f64) -> usize {
    if !break_secs.is_finite() || !segment_secs.is_finite() || break_secs <= 0.0 || segment_secs <= 0.0 {
        return 0;
    }
    ((break_secs - SKIP_EPSILON_SECS) / segment_secs).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::tests::live_playlist;

    #[test]
    fn averages_leading_segments() {
        let src = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n\
                   #EXTINF:1.9,\na.ts\n#EXTINF:2.1,\nb.ts\n#EXTINF:2.0,\nc.ts\n#EXTINF:9.0,\nd.ts\n";
        let pl = Playlist::parse(src);
        assert_eq!(detect_segment_duration(&pl, 3), Some(2.0));
        assert_eq!(detect_segment_duration(&pl, 4), Some(3.75));
    }

    #[test]
    fn observed_origin_durations() {
        for secs in [1.92, 2.0, 4.004, 6.0] {
            let src = live_playlist(8, secs);
            let pl = Playlist::parse(&src);
            assert_eq!(
                detect_segment_duration(&pl, DEFAULT_DURATION_SAMPLE),
                Some(secs)
            );
        }
    }

    #[test]
    fn target_duration_is_not_a_fallback() {
        let pl = Playlist::parse("#EXTM3U\n#EXT-X-TARGETDURATION:6\n");
        assert_eq!(detect_segment_duration(&pl, DEFAULT_DURATION_SAMPLE), None);
    }

    #[test]
    fn skip_count_rounds_up() {
        assert_eq!(compute_skip_count(30.0, 2.0), 15);
        assert_eq!(compute_skip_count(30.0, 6.0), 5);
        assert_eq!(compute_skip_count(31.0, 6.0), 6);
        assert_eq!(compute_skip_count(30.0, 1.92), 16);
        assert_eq!(compute_skip_count(0.5, 6.0), 1);
    }

    #[test]
    fn skip_count_rejects_bad_input() {
        assert_eq!(compute_skip_count(0.0, 6.0), 0);
        assert_eq!(compute_skip_count(-5.0, 6.0), 0);
        assert_eq!(compute_skip_count(30.0, 0.0), 0);
        assert_eq!(compute_skip_count(f64::NAN, 6.0), 0);
        assert_eq!(compute_skip_count(30.0, f64::INFINITY), 0);
    }

    #[test]
    fn skip_count_monotonic_in_break_and_inverse_in_segment() {
        let breaks: Vec<f64> = (1..=240).map(|i| i as f64 * 0.5).collect();
        let segments = [1.9, 2.0, 2.5, 4.0, 6.0];
        for seg in segments {
            for pair in breaks.windows(2) {
                assert!(compute_skip_count(pair[0], seg) <= compute_skip_count(pair[1], seg));
            }
        }
        for brk in &breaks {
            for pair in segments.windows(2) {
                assert!(compute_skip_count(*brk, pair[0]) >= compute_skip_count(*brk, pair[1]));
            }
        }
    }
}
