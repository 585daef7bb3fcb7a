//! Background transcode submission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Error, Result};

/// A request to add renditions to an asset. `incremental` jobs merge into
/// the existing variant set and never replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub job_id: Uuid,
    pub asset_id: String,
    pub target_bitrates: Vec<u32>,
    pub incremental: bool,
    pub requested_at: DateTime<Utc>,
}

impl TranscodeJob {
    pub fn incremental(asset_id: impl Into<String>, target_bitrates: Vec<u32>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            asset_id: asset_id.into(),
            target_bitrates,
            incremental: true,
            requested_at: Utc::now(),
        }
    }
}

/// Fire-and-forget job submission.
#[async_trait]
pub trait TranscodeQueue: Send + Sync {
    async fn enqueue(&self, job: TranscodeJob) -> Result<()>;
}

/// Queue backed by a bounded channel. The worker on the receiving side lives
/// outside this crate.
#[derive(Clone)]
pub struct ChannelTranscodeQueue {
    tx: mpsc::Sender<TranscodeJob>,
}

impl ChannelTranscodeQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TranscodeJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TranscodeQueue for ChannelTranscodeQueue {
    async fn enqueue(&self, job: TranscodeJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                Error::other(format!("transcode queue full, dropped job {}", job.job_id))
            }
            mpsc::error::TrySendError::Closed(_) => Error::other("transcode queue closed"),
        })
    }
}
