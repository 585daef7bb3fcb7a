//! Messages understood by a channel actor.

use std::sync::Arc;

use scte35::CueSignal;
use tokio::sync::oneshot;

use super::state::{AdBreakWindow, ChannelSnapshot, SkipCause, SpliceProgress};
use crate::config::ChannelConfig;

/// Reply to a manual break request.
pub type BreakReply = oneshot::Sender<Result<AdBreakWindow, SkipCause>>;

#[derive(Debug)]
pub enum ChannelMessage {
    /// A decoded cue from the signal monitor or the ingest API.
    Cue(CueSignal),
    /// Start the interval break for the current schedule slot.
    IntervalTick,
    /// Operator-requested break starting now.
    ManualBreak {
        seconds: f64,
        reply: Option<BreakReply>,
    },
    /// Apply new configuration without restarting.
    ConfigUpdate(Arc<ChannelConfig>),
    /// How far the latest splice of the active break got.
    SpliceProgress(SpliceProgress),
    /// The ended break no longer has an anchor in viewer windows.
    RetireBreak { break_id: String },
    /// Query current state.
    Snapshot(oneshot::Sender<ChannelSnapshot>),
    /// Request graceful shutdown.
    Stop,
}
