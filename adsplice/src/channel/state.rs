//! Per-channel state owned by the channel actor.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use hls_splice::AdBreak;
use scte35::{CueKind, CueSignal, ValidationError, ValidationWarning};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::ChannelKey;
use crate::decision::Decision;

/// Most cues kept in the history ring.
pub const CUE_HISTORY_LIMIT: usize = 64;

/// Oldest cue kept in the history ring, in seconds.
pub const CUE_HISTORY_WINDOW_SECS: i64 = 600;

/// Identity used to drop repeated cues.
///
/// Binary cues dedupe on their event id, then on PTS. Cues without either
/// fall back to the wall-clock start. A tag with none of these dedupes on a
/// digest of its line, so the same tag seen twice maps to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    pub fn for_signal(signal: &CueSignal) -> Self {
        if let Some(event_id) = signal.event_id() {
            return Self(format!("event:{event_id}"));
        }
        if let Some(pts) = signal.pts_ticks() {
            return Self(format!("pts:{pts}"));
        }
        if let Some(pdt) = signal.start_pdt() {
            return Self(format!("pdt:{}", pdt.timestamp_millis()));
        }
        match signal {
            CueSignal::Attribute(cue) => Self(format!("tag:{:016x}", line_digest(&cue.line))),
            CueSignal::Binary(_) => Self(format!("sig:{}", signal.id())),
        }
    }

    /// Interval breaks dedupe on their schedule slot.
    pub fn interval(slot: i64) -> Self {
        Self(format!("interval:{slot}"))
    }

    pub fn manual(at: DateTime<Utc>) -> Self {
        Self(format!("manual:{}", at.timestamp_micros()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn line_digest(line: &str) -> u64 {
    let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Cue,
    Interval,
    Manual,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Cue => "cue",
            TriggerSource::Interval => "interval",
            TriggerSource::Manual => "manual",
        }
    }
}

/// A break the channel has committed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdBreakWindow {
    pub id: String,
    pub trigger: TriggerSource,
    pub start_pdt: DateTime<Utc>,
    pub duration_secs: f64,
    pub dedupe_key: DedupeKey,
    pub signal_id: Option<String>,
    pub event_id: Option<u32>,
}

impl AdBreakWindow {
    pub fn end(&self) -> DateTime<Utc> {
        self.start_pdt + Duration::milliseconds((self.duration_secs * 1000.0).round() as i64)
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.end()
    }

    pub fn as_ad_break(&self) -> AdBreak {
        AdBreak {
            id: self.id.clone(),
            start: self.start_pdt,
            duration_secs: self.duration_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakPhase {
    Idle,
    /// Committed, waiting on the decision.
    BreakPending { window: AdBreakWindow },
    BreakActive {
        window: AdBreakWindow,
        decision: Decision,
        /// The decision source missed its deadline and filler was used.
        decision_timed_out: bool,
    },
}

impl BreakPhase {
    pub fn name(&self) -> &'static str {
        match self {
            BreakPhase::Idle => "idle",
            BreakPhase::BreakPending { .. } => "break_pending",
            BreakPhase::BreakActive { .. } => "break_active",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, BreakPhase::Idle)
    }

    pub fn window(&self) -> Option<&AdBreakWindow> {
        match self {
            BreakPhase::Idle => None,
            BreakPhase::BreakPending { window } | BreakPhase::BreakActive { window, .. } => {
                Some(window)
            }
        }
    }
}

/// Why a break was not started.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipCause {
    Invalid { errors: Vec<ValidationError> },
    TierMismatch { channel_tier: u16, signal_tier: Option<u16> },
    /// The trigger source is switched off for this channel.
    TriggerDisabled { trigger: TriggerSource },
    Duplicate { key: DedupeKey },
    BreakInProgress,
}

impl SkipCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipCause::Invalid { .. } => "invalid",
            SkipCause::TierMismatch { .. } => "tier_mismatch",
            SkipCause::TriggerDisabled { .. } => "trigger_disabled",
            SkipCause::Duplicate { .. } => "duplicate",
            SkipCause::BreakInProgress => "break_in_progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CueDisposition {
    Triggered { break_id: String },
    Ended,
    /// Continuations and non-break commands.
    Ignored,
    Skipped(SkipCause),
}

/// A cue as seen by the channel, whatever came of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCue {
    pub signal_id: String,
    pub kind: CueKind,
    pub event_id: Option<u32>,
    pub pts_ticks: Option<u64>,
    pub crc_valid: Option<bool>,
    pub upid: Option<String>,
    pub received_at: DateTime<Utc>,
    pub disposition: CueDisposition,
    pub warnings: Vec<ValidationWarning>,
}

impl RecordedCue {
    pub fn new(
        signal: &CueSignal,
        received_at: DateTime<Utc>,
        disposition: CueDisposition,
        warnings: Vec<ValidationWarning>,
    ) -> Self {
        Self {
            signal_id: signal.id().to_string(),
            kind: signal.kind(),
            event_id: signal.event_id(),
            pts_ticks: signal.pts_ticks(),
            crc_valid: signal.crc_valid(),
            upid: signal.upid().map(|u| u.as_display()),
            received_at,
            disposition,
            warnings,
        }
    }
}

/// Where the last splice of the active break stopped, as reported back by
/// manifest requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpliceProgress {
    pub segment_duration: f64,
    pub skipped_segments: usize,
    pub remaining_skip: usize,
    pub reported_at: DateTime<Utc>,
}

/// The last break that ran to completion. Manifests keep splicing it while
/// its anchor is still in the live window, so players that already loaded
/// the ad segments see the same media on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndedBreak {
    pub window: AdBreakWindow,
    pub decision: Decision,
}

/// The break a manifest request should condition against.
#[derive(Debug, Clone, Copy)]
pub struct SpliceTarget<'a> {
    pub window: &'a AdBreakWindow,
    pub decision: &'a Decision,
    /// The break is over on the channel clock and is only kept for
    /// viewers whose window still holds its anchor.
    pub ended: bool,
}

/// Read-only copy of a channel's state handed to manifest requests.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub channel: ChannelKey,
    pub phase: BreakPhase,
    pub recent_cues: Vec<RecordedCue>,
    pub last_splice: Option<SpliceProgress>,
    pub ended_break: Option<EndedBreak>,
    pub breaks_started: u64,
    pub taken_at: DateTime<Utc>,
}

impl ChannelSnapshot {
    /// The active break and its decision, if the break has not elapsed.
    pub fn active_break(&self, now: DateTime<Utc>) -> Option<(&AdBreakWindow, &Decision)> {
        match &self.phase {
            BreakPhase::BreakActive {
                window, decision, ..
            } if !window.has_elapsed(now) => Some((window, decision)),
            _ => None,
        }
    }

    /// The running break, else the last ended one. Whether it still
    /// applies is up to the anchor search, not the clock.
    pub fn splice_target(&self) -> Option<SpliceTarget<'_>> {
        if let BreakPhase::BreakActive {
            window, decision, ..
        } = &self.phase
        {
            return Some(SpliceTarget {
                window,
                decision,
                ended: false,
            });
        }
        self.ended_break.as_ref().map(|ended| SpliceTarget {
            window: &ended.window,
            decision: &ended.decision,
            ended: true,
        })
    }
}

pub struct ChannelState {
    cues: VecDeque<RecordedCue>,
    seen: HashMap<DedupeKey, DateTime<Utc>>,
    phase: BreakPhase,
    last_splice: Option<SpliceProgress>,
    ended_break: Option<EndedBreak>,
    breaks_started: u64,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            cues: VecDeque::with_capacity(CUE_HISTORY_LIMIT),
            seen: HashMap::new(),
            phase: BreakPhase::Idle,
            last_splice: None,
            ended_break: None,
            breaks_started: 0,
        }
    }

    pub fn phase(&self) -> &BreakPhase {
        &self.phase
    }

    pub fn set_phase(&mut self, phase: BreakPhase) {
        if let BreakPhase::BreakPending { .. } = phase {
            self.breaks_started += 1;
        }
        if phase.is_idle() {
            self.last_splice = None;
        }
        if let BreakPhase::BreakActive { .. } = phase {
            self.ended_break = None;
        }
        self.phase = phase;
    }

    /// Take the phase out, leaving `Idle`.
    pub fn take_phase(&mut self) -> BreakPhase {
        self.last_splice = None;
        std::mem::replace(&mut self.phase, BreakPhase::Idle)
    }

    /// Keep `ended` for manifests until its anchor leaves the window.
    pub fn keep_ended(&mut self, ended: EndedBreak) {
        self.ended_break = Some(ended);
    }

    /// Forget the ended break if it is `break_id`. Returns whether it was.
    pub fn retire_ended(&mut self, break_id: &str) -> bool {
        if self
            .ended_break
            .as_ref()
            .is_some_and(|ended| ended.window.id == break_id)
        {
            self.ended_break = None;
            return true;
        }
        false
    }

    pub fn ended_break(&self) -> Option<&EndedBreak> {
        self.ended_break.as_ref()
    }

    pub fn record(&mut self, cue: RecordedCue) {
        if self.cues.len() == CUE_HISTORY_LIMIT {
            self.cues.pop_front();
        }
        self.cues.push_back(cue);
    }

    pub fn recent_cues(&self) -> impl Iterator<Item = &RecordedCue> {
        self.cues.iter()
    }

    pub fn is_seen(&self, key: &DedupeKey) -> bool {
        self.seen.contains_key(key)
    }

    pub fn mark_seen(&mut self, key: DedupeKey, at: DateTime<Utc>) {
        self.seen.insert(key, at);
    }

    /// Forget cues and dedupe keys older than the history window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(CUE_HISTORY_WINDOW_SECS);
        while self.cues.front().is_some_and(|c| c.received_at < cutoff) {
            self.cues.pop_front();
        }
        self.seen.retain(|_, seen_at| *seen_at >= cutoff);
        if self
            .ended_break
            .as_ref()
            .is_some_and(|ended| ended.window.end() < cutoff)
        {
            self.ended_break = None;
        }
    }

    pub fn set_last_splice(&mut self, progress: SpliceProgress) {
        self.last_splice = Some(progress);
    }

    pub fn breaks_started(&self) -> u64 {
        self.breaks_started
    }

    pub fn snapshot(&self, channel: &ChannelKey, now: DateTime<Utc>) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: channel.clone(),
            phase: self.phase.clone(),
            recent_cues: self.cues.iter().cloned().collect(),
            last_splice: self.last_splice,
            ended_break: self.ended_break.clone(),
            breaks_started: self.breaks_started,
            taken_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_772_366_400 + secs, 0).unwrap()
    }

    fn recorded(signal: &CueSignal, secs: i64) -> RecordedCue {
        RecordedCue::new(signal, at(secs), CueDisposition::Ignored, Vec::new())
    }

    fn window() -> AdBreakWindow {
        AdBreakWindow {
            id: "brk-1".to_string(),
            trigger: TriggerSource::Manual,
            start_pdt: at(0),
            duration_secs: 30.0,
            dedupe_key: DedupeKey::manual(at(0)),
            signal_id: None,
            event_id: None,
        }
    }

    #[test]
    fn test_dedupe_key_prefers_event_id() {
        let binary = scte35::parse_payload(
            "fc302f000000000000fffff014054800008f7feffe7369c02efe0052ccf500000000000a0008435545490000013562dba30a",
        )
        .unwrap();
        assert_eq!(DedupeKey::for_signal(&binary).as_str(), "event:1207959695");

        let attr = scte35::parse_tag_line("#EXT-X-CUE-OUT:30")
            .unwrap()
            .with_start_pdt(at(0));
        assert_eq!(
            DedupeKey::for_signal(&attr).as_str(),
            format!("pdt:{}", at(0).timestamp_millis())
        );

        let bare = scte35::parse_tag_line("#EXT-X-CUE-OUT:30").unwrap();
        assert!(DedupeKey::for_signal(&bare).as_str().starts_with("tag:"));
    }

    #[test]
    fn test_same_tag_line_shares_a_key() {
        let first = scte35::parse_tag_line("#EXT-X-CUE-OUT:30").unwrap();
        let again = scte35::parse_tag_line(" #EXT-X-CUE-OUT:30 ").unwrap();
        let other = scte35::parse_tag_line("#EXT-X-CUE-OUT:45").unwrap();
        assert_ne!(first.id(), again.id());
        assert_eq!(DedupeKey::for_signal(&first), DedupeKey::for_signal(&again));
        assert_ne!(DedupeKey::for_signal(&first), DedupeKey::for_signal(&other));
    }

    #[test]
    fn test_ring_is_bounded() {
        let signal = scte35::parse_tag_line("#EXT-X-CUE-IN").unwrap();
        let mut state = ChannelState::new();
        for i in 0..(CUE_HISTORY_LIMIT as i64 + 10) {
            state.record(recorded(&signal, i));
        }
        assert_eq!(state.recent_cues().count(), CUE_HISTORY_LIMIT);
        assert_eq!(state.recent_cues().next().unwrap().received_at, at(10));
    }

    #[test]
    fn test_prune_drops_old_cues_and_keys() {
        let signal = scte35::parse_tag_line("#EXT-X-CUE-IN").unwrap();
        let mut state = ChannelState::new();
        state.record(recorded(&signal, 0));
        state.record(recorded(&signal, 500));
        state.mark_seen(DedupeKey::interval(1), at(0));
        state.mark_seen(DedupeKey::interval(2), at(500));

        state.prune(at(700));
        assert_eq!(state.recent_cues().count(), 1);
        assert!(!state.is_seen(&DedupeKey::interval(1)));
        assert!(state.is_seen(&DedupeKey::interval(2)));
    }

    #[test]
    fn test_window_end_and_active_break() {
        let w = window();
        assert_eq!(w.end(), at(30));
        assert!(!w.has_elapsed(at(29)));
        assert!(w.has_elapsed(at(30)));

        let mut state = ChannelState::new();
        state.set_phase(BreakPhase::BreakPending { window: w.clone() });
        assert_eq!(state.breaks_started(), 1);
        state.set_phase(BreakPhase::BreakActive {
            window: w,
            decision: Decision::filler("slate"),
            decision_timed_out: false,
        });

        let key = ChannelKey::new("acme", "news");
        let snapshot = state.snapshot(&key, at(10));
        assert!(snapshot.active_break(at(10)).is_some());
        assert!(snapshot.active_break(at(31)).is_none());
        assert_eq!(snapshot.phase.name(), "break_active");
    }

    #[test]
    fn test_ended_break_stays_a_splice_target() {
        let mut state = ChannelState::new();
        state.set_phase(BreakPhase::BreakActive {
            window: window(),
            decision: Decision::filler("slate"),
            decision_timed_out: false,
        });
        let key = ChannelKey::new("acme", "news");
        let running = state.snapshot(&key, at(10));
        let target = running.splice_target().unwrap();
        assert!(!target.ended);

        if let BreakPhase::BreakActive {
            window, decision, ..
        } = state.take_phase()
        {
            state.keep_ended(EndedBreak { window, decision });
        }
        let after = state.snapshot(&key, at(45));
        assert!(after.active_break(at(45)).is_none());
        let target = after.splice_target().unwrap();
        assert!(target.ended);
        assert_eq!(target.window.id, "brk-1");

        assert!(!state.retire_ended("brk-other"));
        assert!(state.retire_ended("brk-1"));
        assert!(state.snapshot(&key, at(46)).splice_target().is_none());
    }

    #[test]
    fn test_new_break_replaces_ended_break() {
        let mut state = ChannelState::new();
        state.keep_ended(EndedBreak {
            window: window(),
            decision: Decision::filler("slate"),
        });
        let mut next = window();
        next.id = "brk-2".to_string();
        state.set_phase(BreakPhase::BreakPending { window: next.clone() });
        assert!(state.ended_break().is_some());
        state.set_phase(BreakPhase::BreakActive {
            window: next,
            decision: Decision::filler("slate"),
            decision_timed_out: false,
        });
        assert!(state.ended_break().is_none());
    }

    #[test]
    fn test_prune_forgets_old_ended_break() {
        let mut state = ChannelState::new();
        state.keep_ended(EndedBreak {
            window: window(),
            decision: Decision::filler("slate"),
        });
        state.prune(at(600));
        assert!(state.ended_break().is_some());
        state.prune(at(700));
        assert!(state.ended_break().is_none());
    }
}
