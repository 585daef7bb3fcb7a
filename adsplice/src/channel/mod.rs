//! Per-channel actors and the state they own.

pub mod actor;
pub mod handle;
pub mod messages;
pub mod registry;
pub mod state;

pub use actor::{ActorOutcome, ChannelActor, ChannelActorSettings};
pub use handle::{ActorHandle, ActorMetadata, SendError};
pub use messages::ChannelMessage;
pub use registry::ChannelRegistry;
pub use state::{
    AdBreakWindow, BreakPhase, ChannelSnapshot, ChannelState, CueDisposition, DedupeKey,
    EndedBreak, RecordedCue, SkipCause, SpliceProgress, SpliceTarget, TriggerSource,
};
