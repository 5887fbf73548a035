use std::path::PathBuf;

/// Maximum concurrent sessions held by the [`crate::directory::SessionDirectory`].
pub const MAX_SESSIONS: usize = 256;
/// Maximum concurrent rooms held by the [`crate::room::RoomRegistry`].
pub const MAX_ROOMS: usize = 256;
/// Maximum members per room.
pub const MAX_ROOM_MEMBERS: usize = 15;
/// Capacity of the bounded upload queue.
pub const UPLOAD_QUEUE_CAPACITY: usize = 5;
/// Number of upload workers draining the queue.
pub const UPLOAD_WORKER_COUNT: usize = 5;
/// Largest accepted file payload, in bytes (3 MiB).
pub const MAX_FILE_BYTES: u64 = 3 * 1024 * 1024;
/// Shortest accepted display name / room name length.
pub const MIN_NAME_LEN: usize = 1;
/// Longest accepted display name.
pub const MAX_USERNAME_LEN: usize = 16;
/// Longest accepted room name.
pub const MAX_ROOMNAME_LEN: usize = 32;
/// Longest accepted upload basename.
pub const MAX_FILENAME_LEN: usize = 255;

/// Runtime configuration for the relay daemon.
///
/// Deliberately small: the wire protocol only ever needs a bind port, and
/// there is nothing else an operator could usefully tune from the command
/// line without inventing requirements. See DESIGN.md for the reasoning
/// behind keeping this a two-field struct rather than a file-backed config
/// layer.
#[derive(Debug, Clone)]
pub struct Config {
  /// Address the supervisor binds its listener to.
  pub bind_addr: String,
  /// Directory the log sink creates its timestamped log file under.
  pub log_dir: PathBuf,
}

impl Config {
  #[must_use]
  pub fn new(port: u16, log_dir: PathBuf) -> Self {
    Self {
      bind_addr: format!("0.0.0.0:{port}"),
      log_dir,
    }
  }
}
