//! Ad insertion events.
//!
//! Events are fire-and-forget. A sink must never block the caller.

use chrono::{DateTime, Utc};
use hls_splice::SkipReason;
use scte35::{CueKind, CueSignal, CueSource};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::state::{SkipCause, TriggerSource};
use crate::config::ChannelKey;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdEvent {
    CueReceived {
        channel: ChannelKey,
        signal_id: String,
        kind: CueKind,
        source: CueSource,
        event_id: Option<u32>,
        pts_ticks: Option<u64>,
        crc_valid: Option<bool>,
        upid: Option<String>,
        at: DateTime<Utc>,
    },
    BreakStarted {
        channel: ChannelKey,
        break_id: String,
        trigger: TriggerSource,
        start_pdt: DateTime<Utc>,
        duration_secs: f64,
        asset_id: String,
        filler: bool,
        cache_hit: bool,
        event_id: Option<u32>,
    },
    BreakSkipped {
        channel: ChannelKey,
        trigger: TriggerSource,
        signal_id: Option<String>,
        cause: SkipCause,
    },
    BreakEnded {
        channel: ChannelKey,
        break_id: String,
        reason: BreakEndReason,
    },
    DecisionTimeout {
        channel: ChannelKey,
        break_id: String,
        timeout_ms: u64,
    },
    TranscodeEnqueued {
        channel: ChannelKey,
        asset_id: String,
        job_id: Uuid,
        bitrates: Vec<u32>,
    },
    SpliceSkipped {
        channel: ChannelKey,
        variant: String,
        break_id: String,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakEndReason {
    Elapsed,
    /// An end or cancel cue arrived.
    Signal,
    Stopped,
}

impl AdEvent {
    pub fn cue_received(channel: &ChannelKey, signal: &CueSignal, at: DateTime<Utc>) -> Self {
        AdEvent::CueReceived {
            channel: channel.clone(),
            signal_id: signal.id().to_string(),
            kind: signal.kind(),
            source: signal.source(),
            event_id: signal.event_id(),
            pts_ticks: signal.pts_ticks(),
            crc_valid: signal.crc_valid(),
            upid: signal.upid().map(|u| u.as_display()),
            at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdEvent::CueReceived { .. } => "cue_received",
            AdEvent::BreakStarted { .. } => "break_started",
            AdEvent::BreakSkipped { .. } => "break_skipped",
            AdEvent::BreakEnded { .. } => "break_ended",
            AdEvent::DecisionTimeout { .. } => "decision_timeout",
            AdEvent::TranscodeEnqueued { .. } => "transcode_enqueued",
            AdEvent::SpliceSkipped { .. } => "splice_skipped",
        }
    }

    pub fn channel(&self) -> &ChannelKey {
        match self {
            AdEvent::CueReceived { channel, .. }
            | AdEvent::BreakStarted { channel, .. }
            | AdEvent::BreakSkipped { channel, .. }
            | AdEvent::BreakEnded { channel, .. }
            | AdEvent::DecisionTimeout { channel, .. }
            | AdEvent::TranscodeEnqueued { channel, .. }
            | AdEvent::SpliceSkipped { channel, .. } => channel,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AdEvent);
}

/// Writes every event to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: AdEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(
                target: "adsplice::events",
                event = event.name(),
                channel = %event.channel(),
                %payload,
                "Ad event"
            ),
            Err(e) => warn!(event = event.name(), error = %e, "Failed to serialize event"),
        }
    }
}

/// Forwards events over a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<AdEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AdEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: AdEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let event = match &e {
                mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => {
                    ev.name()
                }
            };
            warn!(event, "Event dropped, sink unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended() -> AdEvent {
        AdEvent::BreakEnded {
            channel: ChannelKey::new("acme", "news"),
            break_id: "brk-1".to_string(),
            reason: BreakEndReason::Elapsed,
        }
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(ended()).unwrap();
        assert_eq!(json["type"], "break_ended");
        assert_eq!(json["reason"], "elapsed");
        assert_eq!(json["channel"]["org"], "acme");
    }

    #[test]
    fn test_cue_received_carries_cue_fields() {
        let signal = scte35::parse_payload(
            "fc302f000000000000fffff014054800008f7feffe7369c02efe0052ccf500000000000a0008435545490000013562dba30a",
        )
        .unwrap();
        let event = AdEvent::cue_received(&ChannelKey::new("acme", "news"), &signal, Utc::now());
        match event {
            AdEvent::CueReceived {
                event_id,
                crc_valid,
                pts_ticks,
                ..
            } => {
                assert_eq!(event_id, Some(1207959695));
                assert_eq!(crc_valid, Some(true));
                assert!(pts_ticks.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelEventSink::new(1);
        sink.emit(ended());
        sink.emit(ended());
        assert_eq!(rx.recv().await.unwrap().name(), "break_ended");
        assert!(rx.try_recv().is_err());
    }
}
