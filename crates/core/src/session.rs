//! Per-connection task: registration handshake, command dispatch, and
//! notify delivery.
//!
//! Shaped after the canonical tokio mini-redis `Handler`: one task per
//! connection, split into owned read/write halves so the `tokio::select!`
//! loop below can hold a mutable borrow of the writer across awaits
//! without fighting the borrow checker. Each connection owns exactly one
//! room membership at a time, tracked as a local `Option<String>` rather
//! than anything shared — nobody but this task ever changes which room it
//! is in.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::MAX_USERNAME_LEN;
use crate::directory::SessionDirectory;
use crate::error::RelayError;
use crate::logsink::LogSink;
use crate::notify::{self, NotifyMessage, NotifyReceiver};
use crate::protocol::{self, Command};
use crate::queue::{self, UploadJob, UploadSender};
use crate::room::RoomRegistry;

/// The exact line every live session receives once, on operator shutdown.
const SHUTDOWN_MESSAGE: &str = "[SERVER] shutting down. Goodbye.";

/// Shared, already-`Arc`-wrapped context every session needs. Built once by
/// the supervisor and cloned (cheaply — every field is an `Arc`) into each
/// connection task. Nothing here is ever reached through a global; it is
/// threaded down explicitly from `supervisor::run`.
#[derive(Clone)]
pub struct SharedState {
  pub directory: Arc<SessionDirectory>,
  pub rooms: Arc<RoomRegistry>,
  pub uploads: UploadSender,
  pub log: Arc<LogSink>,
}

/// Drive one client connection end to end. Returns once the client
/// disconnects, sends `/exit`, or the server starts shutting down.
pub async fn run(
  socket: TcpStream,
  addr: SocketAddr,
  state: SharedState,
  mut shutdown: broadcast::Receiver<()>,
) {
  let (read_half, write_half) = socket.into_split();
  let mut reader = BufReader::new(read_half);
  let mut writer = write_half;

  let (notify_tx, notify_rx) = notify::channel();
  let name = match register(&mut reader, &mut writer, &state, notify_tx, &mut shutdown).await {
    Some(name) => name,
    None => return,
  };

  info!(%addr, name, "session registered");
  state.log.write(&format!("{name} connected from {addr}"));

  serve(&mut reader, &mut writer, notify_rx, &state, &name, &mut shutdown).await;

  state.directory.deregister(&name);
  state.log.write(&format!("{name} disconnected"));
  info!(%addr, name, "session ended");
}

/// Registration handshake: prompt for a username until one is both
/// syntactically valid and not already taken, or until the directory is
/// full — a recoverable condition that re-prompts rather than disconnects,
/// the same way a name collision does.
async fn register(
  reader: &mut BufReader<OwnedReadHalf>,
  writer: &mut OwnedWriteHalf,
  state: &SharedState,
  notify_tx: notify::NotifySender,
  shutdown: &mut broadcast::Receiver<()>,
) -> Option<String> {
  loop {
    let line = tokio::select! {
      line = read_registration_line(reader) => line,
      _ = shutdown.recv() => {
        let _ = write_line(writer, SHUTDOWN_MESSAGE).await;
        return None;
      }
    };
    let Some(line) = line else { return None };
    let name = line.trim();

    if !protocol::is_valid_username(name) {
      if write_line(writer, "[ERROR] Username must be 1-16 alphanumeric characters.").await.is_err()
      {
        return None;
      }
      continue;
    }

    match state.directory.register(name, notify_tx.clone()) {
      Ok(()) => {
        if write_line(writer, "[OK] Username accepted.").await.is_err() {
          state.directory.deregister(name);
          return None;
        }
        return Some(name.to_string());
      }
      Err(RelayError::NameTaken(_)) => {
        if write_line(writer, "[ERROR] Username already taken. Choose another.").await.is_err() {
          return None;
        }
      }
      Err(RelayError::DirectoryFull) => {
        if write_line(writer, "[ERROR] Server is full. Try again later.").await.is_err() {
          return None;
        }
      }
      Err(other) => {
        warn!(error = %other, "unexpected registration failure");
        return None;
      }
    }
  }
}

async fn serve(
  reader: &mut BufReader<OwnedReadHalf>,
  writer: &mut OwnedWriteHalf,
  mut notify_rx: NotifyReceiver,
  state: &SharedState,
  name: &str,
  shutdown: &mut broadcast::Receiver<()>,
) {
  let mut current_room: Option<String> = None;

  loop {
    tokio::select! {
      line = read_line(reader) => {
        let Some(line) = line else { break };
        if line.trim().is_empty() {
          continue;
        }
        let command = protocol::parse_command(line.trim_end_matches(['\n', '\r']));
        if matches!(command, Command::Exit) {
          let _ = write_line(writer, "[INFO] Goodbye.").await;
          break;
        }
        if dispatch(command, state, name, &mut current_room, reader, writer).await.is_err() {
          break;
        }
      }
      msg = notify_rx.recv() => {
        match msg {
          Some(msg) => {
            if deliver(writer, msg).await.is_err() {
              break;
            }
          }
          None => break,
        }
      }
      _ = shutdown.recv() => {
        let _ = write_line(writer, SHUTDOWN_MESSAGE).await;
        break;
      }
    }
  }

  if let Some(room) = current_room {
    state.rooms.leave(&room, name);
    state.log.write(&format!("{name} left room {room}"));
  }
}

async fn dispatch(
  command: Command,
  state: &SharedState,
  name: &str,
  current_room: &mut Option<String>,
  reader: &mut BufReader<OwnedReadHalf>,
  writer: &mut OwnedWriteHalf,
) -> std::io::Result<()> {
  match command {
    Command::Join { room } => {
      if !protocol::is_valid_roomname(&room) {
        return write_line(writer, "[ERROR] Invalid room name").await;
      }
      if let Some(prev) = current_room.take() {
        state.rooms.leave(&prev, name);
      }
      match state.rooms.join(&room, name) {
        Ok(()) => {
          *current_room = Some(room.clone());
          state.log.write(&format!("{name} joined room {room}"));
          write_line(writer, &format!("[OK] User \"{name}\" joined the room: {room}")).await
        }
        Err(RelayError::RoomFull(_)) => write_line(writer, "[WARN] Room is full").await,
        Err(RelayError::RegistryFull) => {
          write_line(writer, "[WARN] Server has reached the maximum number of rooms").await
        }
        Err(other) => write_line(writer, &format!("[ERROR] {other}")).await,
      }
    }
    Command::Leave => match current_room.take() {
      Some(room) => {
        state.rooms.leave(&room, name);
        state.log.write(&format!("{name} left room {room}"));
        write_line(writer, &format!("[INFO] left room: {room}")).await
      }
      None => write_line(writer, "[INFO] not in any room").await,
    },
    Command::Broadcast { text } => match current_room.as_deref() {
      Some(room) => {
        broadcast_to_room(state, room, name, &text);
        write_line(writer, "[OK]").await
      }
      None => write_line(writer, "[ERROR] Join a room first").await,
    },
    Command::Whisper { user, text } => {
      if user == name {
        // A whisper is, by definition, addressed to someone other than the
        // sender; there is no self-delivery case to support.
        return write_line(writer, "[ERROR] Cannot whisper to yourself.").await;
      }
      match state.directory.lookup(&user) {
        Some(notify) => {
          if notify.send(NotifyMessage::Line(format!("[{name}] {text}"))).is_err() {
            warn!(to = user, "whisper notify channel closed mid-delivery");
            state.log.write(&format!("whisper from {name} to {user} dropped: channel closed"));
          } else {
            state.log.write(&format!("{name} whispered to {user}"));
          }
          write_line(writer, "[OK]").await
        }
        None => write_line(writer, "[ERROR] not online").await,
      }
    }
    Command::SendFile { filename, user, size } => {
      handle_sendfile(state, name, &user, &filename, size, reader, writer).await
    }
    Command::Malformed { command } => {
      write_line(writer, &format!("[ERROR] malformed {command} command")).await
    }
    Command::Unknown => write_line(writer, "[ERROR] Unknown command").await,
    Command::Exit => unreachable!("handled by the caller"),
  }
}

fn broadcast_to_room(state: &SharedState, room: &str, from: &str, text: &str) {
  // Every current member receives the line, the sender included — a
  // broadcast is not expected to be silent to its own author.
  for member in state.rooms.members(room) {
    if let Some(notify) = state.directory.lookup(&member) {
      if notify.send(NotifyMessage::Line(format!("[{from}] {text}"))).is_err() {
        warn!(to = member, room, "broadcast notify channel closed mid-delivery");
        state.log.write(&format!("broadcast in {room} to {member} dropped: channel closed"));
      }
    }
  }
  state.log.write(&format!("{from} broadcast in {room}: {text}"));
}

/// Validate, read the payload off the wire, and enqueue one upload. The
/// recipient is deliberately not checked here: resolving it happens at
/// dequeue time in [`crate::worker`], so a sender is never told "no such
/// user" for a recipient who might still connect before a worker gets to
/// the item, and a recipient who leaves after enqueue is handled there too.
async fn handle_sendfile(
  state: &SharedState,
  from: &str,
  to: &str,
  filename: &str,
  size: u64,
  reader: &mut BufReader<OwnedReadHalf>,
  writer: &mut OwnedWriteHalf,
) -> std::io::Result<()> {
  if !protocol::is_valid_basename(filename) {
    return write_line(writer, "[ERROR] invalid filename").await;
  }
  if !protocol::is_valid_file_size(size) {
    return write_line(writer, "[ERROR] invalid file size").await;
  }

  let mut payload = vec![0u8; size as usize];
  if let Err(err) = reader.read_exact(&mut payload).await {
    warn!(error = %err, from, to, filename, "upload payload truncated");
    return write_line(writer, "[ERROR] upload truncated").await;
  }

  if queue::is_full(&state.uploads) {
    write_line(writer, "[INFO] upload queue is busy, request queued").await?;
  }

  let job = UploadJob::Upload {
    from: from.to_string(),
    to: to.to_string(),
    filename: filename.to_string(),
    bytes: Bytes::from(payload),
  };
  match queue::enqueue(&state.uploads, job).await {
    Ok(()) => {
      state.log.write(&format!("{from} queued upload \"{filename}\" for {to}"));
      write_line(writer, "[OK]").await
    }
    Err(queue::EnqueueError::Closed) => write_line(writer, "[ERROR] server shutting down").await,
  }
}

async fn deliver(writer: &mut OwnedWriteHalf, msg: NotifyMessage) -> std::io::Result<()> {
  match msg {
    NotifyMessage::Line(line) => write_line(writer, &line).await,
    NotifyMessage::File { filename, from, bytes } => {
      write_line(writer, &format!("[FILE {filename} {} {from}]", bytes.len())).await?;
      writer.write_all(&bytes).await?;
      writer.flush().await
    }
  }
}

/// Read one registration line capped to [`MAX_USERNAME_LEN`] bytes (plus
/// the trailing newline), per spec.md §4.8 step 1 ("Read a line (≤16
/// bytes)"). A client that never sends `\n` cannot make the server buffer
/// an unbounded line before validation ever runs; an oversized name simply
/// arrives truncated and fails `is_valid_username` like any other bad name.
async fn read_registration_line(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
  let mut line = String::new();
  let mut limited = reader.take(MAX_USERNAME_LEN as u64 + 1);
  match limited.read_line(&mut line).await {
    Ok(0) => None,
    Ok(_) => Some(line),
    Err(err) => {
      warn!(error = %err, "read error, closing connection");
      None
    }
  }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
  let mut line = String::new();
  match reader.read_line(&mut line).await {
    Ok(0) => None,
    Ok(_) => Some(line),
    Err(err) => {
      warn!(error = %err, "read error, closing connection");
      None
    }
  }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
  writer.write_all(line.as_bytes()).await?;
  writer.write_all(b"\n").await?;
  writer.flush().await
}
