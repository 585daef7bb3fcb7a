//! Asset renditions, transcode locking and the resolver that ties them to a
//! channel's bitrate ladder.

pub mod lock;
pub mod resolver;
pub mod store;
pub mod transcode;

pub use lock::{InMemoryLockStore, LockError, LockKey, LockStore};
pub use resolver::{Resolution, ResolvedVariant, TranscodeStatus, VariantResolver};
pub use store::{AssetStore, InMemoryAssetStore, Rendition, VariantSet};
pub use transcode::{ChannelTranscodeQueue, TranscodeJob, TranscodeQueue};
