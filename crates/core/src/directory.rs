//! Session directory: the registry of currently-connected, named sessions.
//!
//! A single `HashMap` behind one lock, keyed by the thing callers address
//! sessions by — here, the client's chosen username. Never reached through
//! a process-wide `static`: callers hold an `Arc<SessionDirectory>` and pass
//! it down explicitly, so every mutation happens under an explicit,
//! traceable lock rather than an ambient global.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::MAX_SESSIONS;
use crate::error::{RelayError, Result};
use crate::notify::NotifySender;

/// A registered session's externally-visible handle.
#[derive(Clone)]
pub struct SessionEntry {
  pub notify: NotifySender,
}

/// Directory of `username -> SessionEntry`, capped at [`MAX_SESSIONS`].
///
/// This is the outermost lock in the registry's locking order: acquire the
/// directory before any [`crate::room::RoomRegistry`] lock, and release it
/// before acquiring one.
pub struct SessionDirectory {
  entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionDirectory {
  #[must_use]
  pub fn new() -> Self {
    Self { entries: Mutex::new(HashMap::new()) }
  }

  /// Atomically check-and-insert: fails with [`RelayError::NameTaken`] if
  /// `name` is already registered, or [`RelayError::DirectoryFull`] once
  /// [`MAX_SESSIONS`] entries are held. Either error is recoverable: the
  /// caller retries with a fresh name rather than disconnecting.
  pub fn register(&self, name: &str, notify: NotifySender) -> Result<()> {
    let mut guard = self.entries.lock();
    if guard.contains_key(name) {
      return Err(RelayError::NameTaken(name.to_string()));
    }
    if guard.len() >= MAX_SESSIONS {
      return Err(RelayError::DirectoryFull);
    }
    guard.insert(name.to_string(), SessionEntry { notify });
    Ok(())
  }

  /// Remove `name`. A missing entry (already removed, or never registered)
  /// is logged by the caller and is not itself an error.
  pub fn deregister(&self, name: &str) -> Option<SessionEntry> {
    self.entries.lock().remove(name)
  }

  /// Look up a session's notify sender without cloning the whole map.
  #[must_use]
  pub fn lookup(&self, name: &str) -> Option<NotifySender> {
    self.entries.lock().get(name).map(|e| e.notify.clone())
  }

  #[must_use]
  pub fn contains(&self, name: &str) -> bool {
    self.entries.lock().contains_key(name)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for SessionDirectory {
  fn default() -> Self {
    Self::new()
  }
}
