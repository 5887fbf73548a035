//! Room registry: named broadcast groups capped in count and membership.
//!
//! Structurally the same `HashMap`-behind-one-lock shape as
//! [`crate::directory::SessionDirectory`], but one level deeper in the
//! locking order: callers must hold (or have already released) the
//! directory lock before touching this one, and never acquire the two in
//! the opposite order. A session belongs to at most one room at a time;
//! that invariant is enforced by the caller (leave the current room before
//! joining another), not by this registry, which stays a plain named-group
//! primitive.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::config::{MAX_ROOM_MEMBERS, MAX_ROOMS};
use crate::error::{RelayError, Result};

struct Room {
  members: HashSet<String>,
}

/// Registry of `room name -> member set`, capped at [`MAX_ROOMS`] rooms and
/// [`MAX_ROOM_MEMBERS`] members each.
pub struct RoomRegistry {
  rooms: Mutex<std::collections::HashMap<String, Room>>,
}

impl RoomRegistry {
  #[must_use]
  pub fn new() -> Self {
    Self { rooms: Mutex::new(std::collections::HashMap::new()) }
  }

  /// Add `member` to `room`, creating the room if it does not yet exist.
  /// Fails with [`RelayError::RegistryFull`] if creating a new room would
  /// exceed [`MAX_ROOMS`], or [`RelayError::RoomFull`] if the (existing or
  /// just-created) room is already at [`MAX_ROOM_MEMBERS`].
  ///
  /// Joining a room a session already belongs to is a no-op success.
  pub fn join(&self, room: &str, member: &str) -> Result<()> {
    let mut guard = self.rooms.lock();
    if !guard.contains_key(room) && guard.len() >= MAX_ROOMS {
      return Err(RelayError::RegistryFull);
    }
    let entry = guard
      .entry(room.to_string())
      .or_insert_with(|| Room { members: HashSet::new() });
    if !entry.members.contains(member) && entry.members.len() >= MAX_ROOM_MEMBERS {
      return Err(RelayError::RoomFull(room.to_string()));
    }
    entry.members.insert(member.to_string());
    Ok(())
  }

  /// Remove `member` from `room`. Empties (and drops) the room once its
  /// last member leaves, so capacity accounting never leaks.
  pub fn leave(&self, room: &str, member: &str) {
    let mut guard = self.rooms.lock();
    if let Some(entry) = guard.get_mut(room) {
      entry.members.remove(member);
      if entry.members.is_empty() {
        guard.remove(room);
      }
    }
  }

  /// `true` iff `room` is currently live (i.e. has at least one member).
  #[must_use]
  pub fn find(&self, room: &str) -> bool {
    self.rooms.lock().contains_key(room)
  }

  /// Snapshot of every current member of `room`, the sender included — a
  /// broadcast echoes back to its own author.
  #[must_use]
  pub fn members(&self, room: &str) -> Vec<String> {
    self.rooms.lock().get(room).map(|r| r.members.iter().cloned().collect()).unwrap_or_default()
  }

  #[must_use]
  pub fn room_count(&self) -> usize {
    self.rooms.lock().len()
  }
}

impl Default for RoomRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn join_creates_room_and_is_idempotent() {
    let reg = RoomRegistry::new();
    reg.join("lobby", "alice").unwrap();
    reg.join("lobby", "alice").unwrap();
    assert_eq!(reg.members("lobby").len(), 1);
  }

  #[test]
  fn find_reports_liveness() {
    let reg = RoomRegistry::new();
    assert!(!reg.find("lobby"));
    reg.join("lobby", "alice").unwrap();
    assert!(reg.find("lobby"));
    reg.leave("lobby", "alice");
    assert!(!reg.find("lobby"));
  }

  #[test]
  fn join_rejects_once_room_is_full() {
    let reg = RoomRegistry::new();
    for i in 0..MAX_ROOM_MEMBERS {
      reg.join("lobby", &format!("user{i}")).unwrap();
    }
    let err = reg.join("lobby", "overflow").unwrap_err();
    assert!(matches!(err, RelayError::RoomFull(r) if r == "lobby"));
  }

  #[test]
  fn join_rejects_once_registry_is_full() {
    let reg = RoomRegistry::new();
    for i in 0..MAX_ROOMS {
      reg.join(&format!("room{i}"), "alice").unwrap();
    }
    let err = reg.join("overflow", "alice").unwrap_err();
    assert!(matches!(err, RelayError::RegistryFull));
  }

  #[test]
  fn leave_drops_empty_room() {
    let reg = RoomRegistry::new();
    reg.join("lobby", "alice").unwrap();
    reg.leave("lobby", "alice");
    assert_eq!(reg.room_count(), 0);
  }

  #[test]
  fn members_includes_the_broadcaster() {
    let reg = RoomRegistry::new();
    reg.join("lobby", "alice").unwrap();
    reg.join("lobby", "bob").unwrap();
    let mut members = reg.members("lobby");
    members.sort();
    assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
  }

  #[test]
  fn leaving_last_member_frees_the_room_for_reuse() {
    let reg = RoomRegistry::new();
    reg.join("lobby", "alice").unwrap();
    reg.leave("lobby", "alice");
    reg.join("lobby", "bob").unwrap();
    assert_eq!(reg.members("lobby"), vec!["bob".to_string()]);
  }
}
