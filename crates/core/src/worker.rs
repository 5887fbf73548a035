//! Upload worker pool.
//!
//! [`UPLOAD_WORKER_COUNT`](crate::config::UPLOAD_WORKER_COUNT) tasks share
//! one receiving end of the [`crate::queue`] channel behind a
//! `tokio::sync::Mutex`, a fixed pool of runners competing for one inbox.
//! The lock only ever guards the `recv` call itself; the actual work (the
//! directory lookup and the notify send) happens after it is released.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::directory::SessionDirectory;
use crate::logsink::LogSink;
use crate::notify::NotifyMessage;
use crate::queue::{UploadJob, UploadReceiver};

/// Spawn the fixed-size upload worker pool. Each worker runs until it pops
/// [`UploadJob::Terminate`], so shutdown must push exactly one terminator
/// per worker.
pub fn spawn_pool(
  worker_count: usize,
  receiver: UploadReceiver,
  directory: Arc<SessionDirectory>,
  log: Arc<LogSink>,
) -> Vec<tokio::task::JoinHandle<()>> {
  let receiver = Arc::new(Mutex::new(receiver));
  (0..worker_count)
    .map(|id| {
      let receiver = Arc::clone(&receiver);
      let directory = Arc::clone(&directory);
      let log = Arc::clone(&log);
      tokio::spawn(run_worker(id, receiver, directory, log))
    })
    .collect()
}

async fn run_worker(
  id: usize,
  receiver: Arc<Mutex<UploadReceiver>>,
  directory: Arc<SessionDirectory>,
  log: Arc<LogSink>,
) {
  loop {
    let job = {
      let mut guard = receiver.lock().await;
      guard.recv().await
    };
    let Some(job) = job else {
      info!(worker = id, "upload queue closed, worker exiting");
      return;
    };
    match job {
      UploadJob::Terminate => {
        info!(worker = id, "upload worker terminating");
        return;
      }
      UploadJob::Upload { from, to, filename, bytes } => {
        deliver(&directory, &log, &from, &to, filename, bytes);
      }
    }
  }
}

fn deliver(
  directory: &SessionDirectory,
  log: &LogSink,
  from: &str,
  to: &str,
  filename: String,
  bytes: bytes::Bytes,
) {
  match directory.lookup(to) {
    Some(notify) => {
      let size = bytes.len();
      let delivered = notify
        .send(NotifyMessage::File { filename: filename.clone(), from: from.to_string(), bytes })
        .is_ok();
      if delivered {
        log.write(&format!("file \"{filename}\" ({size} bytes) delivered from {from} to {to}"));
      } else {
        warn!(to, filename, "recipient notify channel closed mid-delivery");
        log.write(&format!("file \"{filename}\" from {from} to {to} failed: channel closed"));
      }
    }
    None => {
      // The recipient disconnected between enqueue and delivery. The
      // upload is dropped silently from the sender's point of view (it
      // already saw an `[OK] queued` reply); only the audit trail records
      // the drop.
      log.write(&format!("file \"{filename}\" from {from} to {to} dropped: recipient gone"));
    }
  }
}
