//! Append-only, timestamp-prefixed audit log.
//!
//! Distinct from [`crate::logging`]: this is the domain-mandated trail of
//! accepted commands, registrations, and shutdown events, always written
//! as plain `<dir>/YYYYMMDD_HHMMSS.log` lines regardless of the ambient
//! `tracing` configuration.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use tracing::error;

enum State {
  Open(File),
  Failed,
  Closed,
}

/// Thread-safe append-only line writer.
///
/// `write` is a no-op once opening has failed or `close` has been called:
/// a failure to open the sink is reported once to stderr and the server
/// continues running without file logging rather than aborting.
pub struct LogSink {
  state: Mutex<State>,
  path: PathBuf,
}

impl LogSink {
  /// Create `<dir>/YYYYMMDD_HHMMSS.log`, creating `dir` (mode 0755 on Unix)
  /// if it does not exist. Never panics or returns an error: open failures
  /// are reported once via `tracing::error!` and the sink becomes inert.
  #[must_use]
  pub fn open(dir: &Path) -> Self {
    let path = dir.join(format!("{}.log", Local::now().format("%Y%m%d_%H%M%S")));
    let state = match Self::create(dir, &path) {
      Ok(file) => State::Open(file),
      Err(err) => {
        error!(error = %err, path = %path.display(), "failed to open log sink");
        State::Failed
      }
    };
    Self {
      state: Mutex::new(state),
      path,
    }
  }

  fn create(dir: &Path, path: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o755));
    }
    OpenOptions::new().create(true).append(true).open(path)
  }

  #[must_use]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Append one timestamp-prefixed, newline-terminated line. Serializes
  /// concurrent callers and flushes synchronously before returning.
  pub fn write(&self, line: &str) {
    let mut guard = self.state.lock();
    if let State::Open(file) = &mut *guard {
      let stamped = format!("{} - {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), line);
      if file.write_all(stamped.as_bytes()).and_then(|()| file.flush()).is_err() {
        error!("log sink write failed; disabling file logging");
        *guard = State::Failed;
      }
    }
  }

  /// Idempotent close: subsequent `write` calls become no-ops.
  pub fn close(&self) {
    let mut guard = self.state.lock();
    *guard = State::Closed;
  }
}
