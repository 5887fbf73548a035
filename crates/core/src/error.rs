use thiserror::Error;

/// Errors that can cross a module boundary inside the relay core.
///
/// Per-command/per-client failures (malformed input, capacity rejection)
/// are surfaced to the client as protocol reply lines and never become a
/// `RelayError` — this type is for failures that abort a larger operation
/// (binding the listener, exhausting a registry's capacity, etc).
#[derive(Debug, Error)]
pub enum RelayError {
  #[error("failed to bind listener on {addr}: {source}")]
  Bind {
    addr: String,
    #[source]
    source: std::io::Error,
  },

  #[error("session directory is full")]
  DirectoryFull,

  #[error("room registry is full")]
  RegistryFull,

  #[error("room \"{0}\" is full")]
  RoomFull(String),

  #[error("name \"{0}\" is already registered")]
  NameTaken(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
