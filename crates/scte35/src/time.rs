//! 90 kHz presentation-time helpers.
//!
//! PTS values are 33-bit counters, so every conversion wraps at 2^33.

/// Ticks per second of the MPEG system clock used by PTS.
pub const TICKS_PER_SECOND: u64 = 90_000;

/// PTS arithmetic is modulo 2^33.
pub const PTS_MODULUS: u64 = 1 << 33;

const PTS_MASK: u64 = PTS_MODULUS - 1;

/// Convert 90 kHz ticks to seconds.
#[inline]
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    (ticks & PTS_MASK) as f64 / TICKS_PER_SECOND as f64
}

/// Convert seconds to 90 kHz ticks, rounding to the nearest tick.
///
/// Negative and non-finite inputs map to 0. Values past the 33-bit range
/// saturate at [`PTS_MODULUS`] - 1 instead of wrapping.
#[inline]
pub fn seconds_to_ticks(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    ((seconds * TICKS_PER_SECOND as f64).round() as u64).min(PTS_MASK)
}

/// Apply a splice_info_section pts_adjustment to an embedded PTS.
#[inline]
pub fn apply_pts_adjustment(pts: u64, pts_adjustment: u64) -> u64 {
    ((pts & PTS_MASK) + (pts_adjustment & PTS_MASK)) & PTS_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_seconds_convert_exactly() {
        assert_eq!(seconds_to_ticks(30.0), 2_700_000);
        assert_eq!(ticks_to_seconds(2_700_000), 30.0);
    }

    #[test]
    fn round_trip_within_one_tick_across_range() {
        // Walk the 33-bit range with a prime stride plus the edges.
        let mut samples: Vec<u64> = (0..PTS_MODULUS).step_by(7_919_993).collect();
        samples.extend_from_slice(&[0, 1, 89_999, 90_000, PTS_MODULUS - 2, PTS_MODULUS - 1]);

        for ticks in samples {
            let back = seconds_to_ticks(ticks_to_seconds(ticks));
            let diff = back.abs_diff(ticks);
            assert!(diff <= 1, "ticks {ticks} came back as {back}");
        }
    }

    #[test]
    fn adjustment_wraps_at_33_bits() {
        assert_eq!(apply_pts_adjustment(PTS_MODULUS - 10, 20), 10);
        assert_eq!(apply_pts_adjustment(1_000, 0), 1_000);
        assert_eq!(apply_pts_adjustment(0, PTS_MODULUS - 1), PTS_MODULUS - 1);
    }

    #[test]
    fn negative_and_nan_seconds_are_zero() {
        assert_eq!(seconds_to_ticks(-1.0), 0);
        assert_eq!(seconds_to_ticks(f64::NAN), 0);
    }

    #[test]
    fn long_durations_saturate() {
        // 2^33 ticks is a little over 26.5 hours.
        let limit = PTS_MODULUS - 1;
        assert_eq!(seconds_to_ticks(30.0 * 3600.0), limit);
        assert_eq!(seconds_to_ticks(PTS_MODULUS as f64 / TICKS_PER_SECOND as f64), limit);
        assert_eq!(seconds_to_ticks(1e300), limit);
        assert_eq!(seconds_to_ticks(26.0 * 3600.0), 26 * 3600 * TICKS_PER_SECOND);
    }
}
