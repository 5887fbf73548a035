//! Accept loop and graceful shutdown orchestration.
//!
//! Patterned on the canonical tokio mini-redis `Listener`/shutdown
//! protocol: a `broadcast::channel(1)` tells every live task to stop, and
//! an `mpsc::channel(1)` whose sender is cloned into each task (including
//! the upload workers) lets `run` wait for every one of them to actually
//! finish before returning, by waiting for that channel to close.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::{Config, UPLOAD_WORKER_COUNT};
use crate::directory::SessionDirectory;
use crate::error::{RelayError, Result};
use crate::logsink::LogSink;
use crate::queue::{self, UploadJob};
use crate::room::RoomRegistry;
use crate::session::{self, SharedState};
use crate::worker;

/// Bind the listener and run until `tokio::signal::ctrl_c()` fires or the
/// process otherwise asks to stop. Returns once every connection task and
/// every upload worker has drained.
pub async fn run(config: Config) -> Result<()> {
  let log = Arc::new(LogSink::open(&config.log_dir));
  let directory = Arc::new(SessionDirectory::new());
  let rooms = Arc::new(RoomRegistry::new());

  let listener = TcpListener::bind(&config.bind_addr)
    .await
    .map_err(|source| RelayError::Bind { addr: config.bind_addr.clone(), source })?;
  info!(addr = %config.bind_addr, "listening");
  log.write(&format!("server listening on {}", config.bind_addr));

  let (notify_shutdown, _) = broadcast::channel(1);
  let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);
  let (upload_tx, upload_rx) = queue::channel();

  let worker_handles =
    worker::spawn_pool(UPLOAD_WORKER_COUNT, upload_rx, Arc::clone(&directory), Arc::clone(&log));

  let state = SharedState { directory: Arc::clone(&directory), rooms: Arc::clone(&rooms), uploads: upload_tx.clone(), log: Arc::clone(&log) };

  let accept_result = tokio::select! {
    res = accept_loop(&listener, state.clone(), &notify_shutdown, shutdown_complete_tx.clone()) => res,
    _ = tokio::signal::ctrl_c() => {
      info!("shutdown signal received");
      Ok(())
    }
  };

  if let Err(err) = &accept_result {
    error!(error = %err, "accept loop exited with error");
  }

  log.write("server shutting down");
  drop(notify_shutdown);
  drop(shutdown_complete_tx);
  // Every in-flight connection task holds a clone of `shutdown_complete_tx`;
  // once they have all dropped it, this resolves.
  let _ = shutdown_complete_rx.recv().await;

  // No new producers exist past this point (every session task has
  // already drained), but up to `UPLOAD_QUEUE_CAPACITY` already-enqueued
  // uploads may still occupy the channel. A non-blocking try_send here
  // could fail and starve a worker of its terminator forever, so wait for
  // a free slot the same way a real upload would.
  for _ in 0..UPLOAD_WORKER_COUNT {
    let _ = queue::enqueue(&upload_tx, UploadJob::Terminate).await;
  }
  for handle in worker_handles {
    if let Err(err) = handle.await {
      warn!(error = %err, "upload worker task panicked");
    }
  }

  log.write("server stopped");
  log.close();
  Ok(())
}

async fn accept_loop(
  listener: &TcpListener,
  state: SharedState,
  notify_shutdown: &broadcast::Sender<()>,
  shutdown_complete_tx: mpsc::Sender<()>,
) -> Result<()> {
  let mut backoff = std::time::Duration::from_millis(10);
  loop {
    match listener.accept().await {
      Ok((socket, addr)) => {
        backoff = std::time::Duration::from_millis(10);
        let state = state.clone();
        let shutdown_rx = notify_shutdown.subscribe();
        let shutdown_complete_tx = shutdown_complete_tx.clone();
        tokio::spawn(async move {
          session::run(socket, addr, state, shutdown_rx).await;
          drop(shutdown_complete_tx);
        });
      }
      Err(err) if backoff < std::time::Duration::from_secs(1) => {
        warn!(error = %err, delay_ms = backoff.as_millis(), "accept failed, retrying");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
      }
      Err(err) => return Err(err.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::SocketAddr;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
  use tokio::net::TcpStream;

  async fn spawn_test_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let log_dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let directory = Arc::new(SessionDirectory::new());
    let rooms = Arc::new(RoomRegistry::new());
    let log = Arc::new(LogSink::open(log_dir.path()));
    let (upload_tx, upload_rx) = queue::channel();
    let _workers = worker::spawn_pool(1, upload_rx, Arc::clone(&directory), Arc::clone(&log));
    let state = SharedState { directory, rooms, uploads: upload_tx, log };
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
      let _ = accept_loop(&listener, state, &notify_shutdown, shutdown_complete_tx).await;
    });
    (addr, handle)
  }

  #[tokio::test]
  async fn registers_a_unique_name_and_accepts_a_join() {
    let (addr, _server) = spawn_test_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    write.write_all(b"alice\n").await.unwrap();
    let mut greeting = String::new();
    reader.read_line(&mut greeting).await.unwrap();
    assert!(greeting.starts_with("[OK]"), "got: {greeting}");

    write.write_all(b"/join lobby\n").await.unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).await.unwrap();
    assert!(reply.starts_with("[OK] User \"alice\" joined the room: lobby"), "got: {reply}");
  }
}
