//! Ambient operational logging, separate from the domain-mandated
//! [`crate::logsink`] audit trail.
//!
//! Initializes a global `tracing` subscriber: human-readable to stderr, plus
//! a non-blocking file appender under the configured log directory. Kept as
//! plain text rather than structured JSON — [`crate::logsink`] already owns
//! the structured audit format this daemon cares about persisting.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global `tracing` subscriber. Safe to call more than
/// once: a failed `set_global_default` (e.g. a second call during tests)
/// is silently ignored rather than panicking.
pub fn init(log_dir: &Path) {
  let _ = std::fs::create_dir_all(log_dir);
  let file_appender = tracing_appender::rolling::never(log_dir, "relay.log");
  let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = WORKER_GUARD.set(guard);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
  let file_layer = fmt::layer()
    .with_target(false)
    .with_ansi(false)
    .with_writer(move || nb_writer.clone());

  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init();
}
