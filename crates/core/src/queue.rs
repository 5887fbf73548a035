//! Bounded upload queue.
//!
//! Built directly over `tokio::sync::mpsc::channel`: `enqueue` is
//! `Sender::send`, which suspends the caller once the channel is at
//! capacity and resumes it as soon as a worker drains an item — exactly
//! the backpressure a bounded producer/consumer queue needs, with no
//! separate wait-list to keep in sync. `try_enqueue` is `Sender::try_send`;
//! `is_full` is derived from `Sender::capacity` rather than tracked
//! separately, so it can never drift from the channel's real state.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::UPLOAD_QUEUE_CAPACITY;

/// One queued upload, or the sentinel that tells every worker to exit.
#[derive(Debug)]
pub enum UploadJob {
  Upload { from: String, to: String, filename: String, bytes: Bytes },
  /// Pushed once per worker during shutdown.
  Terminate,
}

pub type UploadSender = mpsc::Sender<UploadJob>;
pub type UploadReceiver = mpsc::Receiver<UploadJob>;

#[must_use]
pub fn channel() -> (UploadSender, UploadReceiver) {
  mpsc::channel(UPLOAD_QUEUE_CAPACITY)
}

/// Blocking enqueue: suspends the caller until a slot is free, then installs
/// `job` at the tail. `Err` only once the receiving side has shut down.
pub async fn enqueue(sender: &UploadSender, job: UploadJob) -> Result<(), EnqueueError> {
  sender.send(job).await.map_err(|_| EnqueueError::Closed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
  Closed,
}

/// Non-blocking enqueue attempt. `Err` means the queue was at capacity or
/// the receiving side has already shut down.
pub fn try_enqueue(sender: &UploadSender, job: UploadJob) -> Result<(), TryEnqueueError> {
  sender.try_send(job).map_err(|err| match err {
    mpsc::error::TrySendError::Full(_) => TryEnqueueError::Full,
    mpsc::error::TrySendError::Closed(_) => TryEnqueueError::Closed,
  })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryEnqueueError {
  Full,
  Closed,
}

/// `true` once every permit is checked out — i.e. the next `try_enqueue`
/// would return [`TryEnqueueError::Full`], and the next `enqueue` would
/// suspend its caller.
#[must_use]
pub fn is_full(sender: &UploadSender) -> bool {
  sender.capacity() == 0
}
