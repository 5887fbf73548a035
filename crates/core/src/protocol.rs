//! Wire-level command parsing and validation.
//!
//! Kept separate from [`crate::session`] so the parsing/validation rules can
//! be unit-tested without spinning up sockets.

use crate::config::{MAX_FILENAME_LEN, MAX_FILE_BYTES, MAX_ROOMNAME_LEN, MAX_USERNAME_LEN, MIN_NAME_LEN};

/// A command parsed from one newline-terminated client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Exit,
  Join { room: String },
  Leave,
  Broadcast { text: String },
  Whisper { user: String, text: String },
  SendFile { filename: String, user: String, size: u64 },
  /// Syntactically recognized command with the wrong argument shape
  /// (e.g. `/join` with no room, or trailing tokens after `/join <room>`).
  Malformed { command: &'static str },
  Unknown,
}

/// Split a raw client line into a [`Command`]. `line` must already have its
/// trailing newline stripped.
#[must_use]
pub fn parse_command(line: &str) -> Command {
  let line = line.trim_end_matches('\r');
  let mut parts = line.splitn(2, char::is_whitespace);
  let head = parts.next().unwrap_or("");
  let rest = parts.next().unwrap_or("").trim_start();

  match head {
    "/exit" => Command::Exit,
    "/leave" => Command::Leave,
    "/join" => {
      let mut tokens = rest.split_whitespace();
      match (tokens.next(), tokens.next()) {
        (Some(room), None) => Command::Join { room: room.to_string() },
        _ => Command::Malformed { command: "/join" },
      }
    }
    "/broadcast" => {
      if rest.is_empty() {
        Command::Malformed { command: "/broadcast" }
      } else {
        Command::Broadcast { text: rest.to_string() }
      }
    }
    "/whisper" => {
      let mut tokens = rest.splitn(2, char::is_whitespace);
      match (tokens.next(), tokens.next()) {
        (Some(user), Some(text)) if !user.is_empty() && !text.trim_start().is_empty() => {
          Command::Whisper { user: user.to_string(), text: text.trim_start().to_string() }
        }
        _ => Command::Malformed { command: "/whisper" },
      }
    }
    "/sendfile" => parse_sendfile(rest),
    "" => Command::Unknown,
    _ => Command::Unknown,
  }
}

fn parse_sendfile(rest: &str) -> Command {
  let mut tokens = rest.split_whitespace();
  let (filename, user, size) = match (tokens.next(), tokens.next(), tokens.next()) {
    (Some(f), Some(u), Some(s)) => (f, u, s),
    _ => return Command::Malformed { command: "/sendfile" },
  };
  if tokens.next().is_some() {
    return Command::Malformed { command: "/sendfile" };
  }
  let Ok(size) = size.parse::<u64>() else {
    return Command::Malformed { command: "/sendfile" };
  };
  Command::SendFile { filename: filename.to_string(), user: user.to_string(), size }
}

/// `1 ≤ len ≤ 16`, `[A-Za-z0-9]` only.
#[must_use]
pub fn is_valid_username(name: &str) -> bool {
  is_valid_alnum(name, MAX_USERNAME_LEN)
}

/// `1 ≤ len ≤ 32`, `[A-Za-z0-9]` only.
#[must_use]
pub fn is_valid_roomname(name: &str) -> bool {
  is_valid_alnum(name, MAX_ROOMNAME_LEN)
}

fn is_valid_alnum(name: &str, max_len: usize) -> bool {
  name.len() >= MIN_NAME_LEN
    && name.len() <= max_len
    && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// `1 ≤ size ≤ 3 MiB`.
#[must_use]
pub fn is_valid_file_size(size: u64) -> bool {
  (1..=MAX_FILE_BYTES).contains(&size)
}

/// Basename only (no path separators), `1..=255` bytes.
#[must_use]
pub fn is_valid_basename(name: &str) -> bool {
  !name.is_empty()
    && name.len() <= MAX_FILENAME_LEN
    && !name.contains('/')
    && !name.contains('\\')
    && name != "."
    && name != ".."
}
