//! Semantic checks run after decoding.
//!
//! Errors mean the cue must not drive a break. Warnings are reported and the
//! cue is still used.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::signal::{CueKind, CueSignal};
use crate::upid::Upid;

/// Default tolerance between a cue's wall-clock start and stream time.
pub const DEFAULT_PDT_WINDOW_SECS: i64 = 300;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("break start without a duration")]
    MissingBreakDuration,

    #[error("break start with zero duration")]
    ZeroBreakDuration,

    #[error("sub_segment_num {num} not below sub_segments_expected {expected}")]
    SubSegmentOutOfRange { num: u8, expected: u8 },

    /// segment_num counts from 1, so it may equal segments_expected.
    #[error("segment_num {num} exceeds segments_expected {expected}")]
    SegmentNumOutOfRange { num: u8, expected: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationWarning {
    CrcMismatch,
    /// A UPID type was signalled with an empty value.
    EmptyUpid,
    /// The UPID bytes did not decode for the signalled type.
    MalformedUpid { upid_type: u8, reason: String },
    /// Start time is further than the window from stream time.
    StaleProgramDateTime { skew_secs: i64 },
    UnparseableProgramDateTime { value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub stream_time: DateTime<Utc>,
    pub pdt_window: Duration,
}

impl ValidationContext {
    pub fn new(stream_time: DateTime<Utc>) -> Self {
        Self {
            stream_time,
            pdt_window: Duration::seconds(DEFAULT_PDT_WINDOW_SECS),
        }
    }

    pub fn with_pdt_window(mut self, window: Duration) -> Self {
        self.pdt_window = window;
        self
    }
}

pub fn validate(signal: &CueSignal, ctx: &ValidationContext) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Missing and zero are rejected alike; no default duration is ever assumed.
    if signal.kind() == CueKind::BreakStart {
        match signal.duration_ticks() {
            None => report.errors.push(ValidationError::MissingBreakDuration),
            Some(0) => report.errors.push(ValidationError::ZeroBreakDuration),
            Some(_) => {}
        }
    }

    if signal.crc_valid() == Some(false) {
        report.warnings.push(ValidationWarning::CrcMismatch);
    }

    if signal.upid().is_some_and(|u| u.is_empty_value()) {
        report.warnings.push(ValidationWarning::EmptyUpid);
    }

    if let Some(Upid::Malformed {
        upid_type, reason, ..
    }) = signal.upid()
    {
        report.warnings.push(ValidationWarning::MalformedUpid {
            upid_type: *upid_type,
            reason: reason.clone(),
        });
    }

    match signal {
        CueSignal::Binary(cue) => {
            for seg in cue.segmentation_descriptors().filter(|s| !s.cancel) {
                if seg.segments_expected != 0 && seg.segment_num > seg.segments_expected {
                    report.errors.push(ValidationError::SegmentNumOutOfRange {
                        num: seg.segment_num,
                        expected: seg.segments_expected,
                    });
                }
                if let (Some(num), Some(expected)) = (seg.sub_segment_num, seg.sub_segments_expected)
                    && expected != 0
                    && num >= expected
                {
                    report
                        .errors
                        .push(ValidationError::SubSegmentOutOfRange { num, expected });
                }
            }
        }
        CueSignal::Attribute(cue) => {
            if let Some(raw) = &cue.start_date_raw
                && cue.core.start_pdt.is_none()
            {
                report
                    .warnings
                    .push(ValidationWarning::UnparseableProgramDateTime { value: raw.clone() });
            }
        }
    }

    if let Some(pdt) = signal.start_pdt() {
        let skew = pdt - ctx.stream_time;
        if skew.abs() > ctx.pdt_window {
            report.warnings.push(ValidationWarning::StaleProgramDateTime {
                skew_secs: skew.num_seconds(),
            });
        }
    }

    report
}

/// Channel tier filtering.
pub struct TierFilter;

impl TierFilter {
    /// Tier 0 channels take every cue. Otherwise the cue's tier, 0 when
    /// absent, must match exactly.
    pub fn accepts(channel_tier: u16, signal_tier: Option<u16>) -> bool {
        channel_tier == 0 || signal_tier.unwrap_or(0) == channel_tier
    }
}
