//! Mailbox sender for a channel actor.
//!
//! A send first tries the mailbox without waiting. When it is full the
//! caller waits for a slot, bounded by a timeout.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// How long a send may wait for a free mailbox slot.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("channel actor is not running")]
    ActorStopped,
    #[error("channel mailbox has no free slot")]
    MailboxFull,
    #[error("no mailbox slot freed up in time")]
    Timeout,
}

impl<M> From<TrySendError<M>> for SendError {
    fn from(err: TrySendError<M>) -> Self {
        match err {
            TrySendError::Full(_) => SendError::MailboxFull,
            TrySendError::Closed(_) => SendError::ActorStopped,
        }
    }
}

impl From<SendError> for crate::Error {
    fn from(err: SendError) -> Self {
        if err == SendError::Timeout {
            crate::Error::Timeout(err.to_string())
        } else {
            crate::Error::ActorUnavailable(err.to_string())
        }
    }
}

/// Identity of the actor behind a handle.
#[derive(Debug, Clone)]
pub struct ActorMetadata {
    /// Channel key in `org/channel` form.
    pub id: String,
    pub spawned_at: Instant,
}

impl ActorMetadata {
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            spawned_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.spawned_at.elapsed()
    }
}

pub struct ActorHandle<M> {
    sender: mpsc::Sender<M>,
    token: CancellationToken,
    pub metadata: ActorMetadata,
}

impl<M> ActorHandle<M> {
    pub fn new(sender: mpsc::Sender<M>, token: CancellationToken, metadata: ActorMetadata) -> Self {
        Self {
            sender,
            token,
            metadata,
        }
    }

    pub async fn send(&self, msg: M) -> Result<(), SendError> {
        self.send_with_timeout(msg, DEFAULT_SEND_TIMEOUT).await
    }

    pub async fn send_with_timeout(&self, msg: M, wait: Duration) -> Result<(), SendError> {
        let msg = match self.sender.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(SendError::ActorStopped),
            Err(TrySendError::Full(msg)) => msg,
        };

        let permit = tokio::time::timeout(wait, self.sender.reserve())
            .await
            .map_err(|_| SendError::Timeout)?
            .map_err(|_| SendError::ActorStopped)?;
        permit.send(msg);
        Ok(())
    }

    /// Never waits: a full mailbox is reported as [`SendError::MailboxFull`].
    pub fn try_send(&self, msg: M) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(SendError::from)
    }

    /// Fire-and-forget send. A message that does not fit is dropped and
    /// logged; returns whether it was queued.
    pub fn offer(&self, msg: M) -> bool {
        match self.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(actor = %self.metadata.id, error = %e, "Dropped message for actor");
                false
            }
        }
    }

    /// Sends a message built around a reply sender and awaits the answer.
    /// `wait` bounds the whole exchange.
    pub async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> M,
        wait: Duration,
    ) -> Result<R, SendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.send_with_timeout(build(reply_tx), wait).await?;
            reply_rx.await.map_err(|_| SendError::ActorStopped)
        };
        match tokio::time::timeout(wait, exchange).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Messages currently waiting in the mailbox.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self::new(self.sender.clone(), self.token.clone(), self.metadata.clone())
    }
}

impl<M> fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("id", &self.metadata.id)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (ActorHandle<u32>, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel::<u32>(capacity);
        let handle = ActorHandle::new(tx, CancellationToken::new(), ActorMetadata::channel("acme/news"));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (handle, mut rx) = handle(10);
        handle.send(42).await.unwrap();
        assert_eq!(handle.queued(), 1);
        assert_eq!(rx.recv().await.unwrap(), 42);
        assert_eq!(handle.queued(), 0);
        assert_eq!(handle.id(), "acme/news");
    }

    #[tokio::test]
    async fn test_mailbox_full() {
        let (handle, _rx) = handle(1);
        handle.try_send(1).unwrap();
        assert_eq!(handle.try_send(2), Err(SendError::MailboxFull));
        assert_eq!(handle.queued(), 1);
    }

    #[tokio::test]
    async fn test_offer_drops_instead_of_waiting() {
        let (handle, mut rx) = handle(1);
        assert!(handle.offer(1));
        assert!(!handle.offer(2));
        assert_eq!(handle.queued(), 1);
        assert_eq!(rx.recv().await, Some(1));

        drop(rx);
        assert!(!handle.offer(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_mailbox_send_times_out() {
        let (handle, _rx) = handle(1);
        handle.try_send(1).unwrap();
        assert_eq!(handle.send(2).await, Err(SendError::Timeout));
    }

    #[tokio::test]
    async fn test_send_waits_for_free_slot() {
        let (handle, mut rx) = handle(1);
        handle.try_send(1).unwrap();
        let reader = tokio::spawn(async move {
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });
        handle.send_with_timeout(2, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reader.await.unwrap(), (Some(1), Some(2)));
    }

    #[tokio::test]
    async fn test_actor_stopped() {
        let (handle, rx) = handle(10);
        drop(rx);
        assert_eq!(handle.send(42).await, Err(SendError::ActorStopped));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_shared_by_clones() {
        let (handle, _rx) = handle(10);
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_send_error_maps_to_service_error() {
        assert!(matches!(
            crate::Error::from(SendError::Timeout),
            crate::Error::Timeout(_)
        ));
        assert!(matches!(
            crate::Error::from(SendError::MailboxFull),
            crate::Error::ActorUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_request_reply() {
        enum Msg {
            Double(u32, oneshot::Sender<u32>),
        }

        let (tx, mut rx) = mpsc::channel::<Msg>(4);
        let handle = ActorHandle::new(tx, CancellationToken::new(), ActorMetadata::channel("acme/news"));
        tokio::spawn(async move {
            while let Some(Msg::Double(n, reply)) = rx.recv().await {
                let _ = reply.send(n * 2);
            }
        });

        let doubled = handle
            .request(|reply| Msg::Double(21, reply), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(doubled, 42);
    }

    #[tokio::test]
    async fn test_request_dropped_reply() {
        let (tx, mut rx) = mpsc::channel::<oneshot::Sender<u32>>(4);
        let handle = ActorHandle::new(tx, CancellationToken::new(), ActorMetadata::channel("acme/news"));
        tokio::spawn(async move {
            while let Some(reply) = rx.recv().await {
                drop(reply);
            }
        });

        let result = handle.request(|reply| reply, Duration::from_secs(1)).await;
        assert_eq!(result, Err(SendError::ActorStopped));
    }
}
