//! Per-session notify channel.
//!
//! Each registered session owns one notify sender (the sending half of an
//! unbounded `tokio::sync::mpsc` channel) stored in the
//! [`crate::directory::SessionDirectory`]. Broadcasts, whispers, and
//! delivered uploads are pushed onto this channel by whichever task produced
//! them; the owning session's writer task drains it and serializes each
//! [`NotifyMessage`] onto the socket. Unbounded because notify delivery must
//! never block the producer (a broadcaster or whisperer) on a slow
//! consumer — only the upload queue is meant to apply backpressure.

use bytes::Bytes;
use tokio::sync::mpsc;

/// One unit of server-to-client push delivery.
#[derive(Debug, Clone)]
pub enum NotifyMessage {
  /// A single already-formatted protocol reply line (no trailing newline).
  Line(String),
  /// An inbound file delivered to this session's directory, ready to be
  /// written out as `<dir>/<filename>`.
  File { filename: String, from: String, bytes: Bytes },
}

/// The sending half held by the rest of the system; the owning session task
/// holds the paired [`mpsc::Receiver`].
pub type NotifySender = mpsc::UnboundedSender<NotifyMessage>;
pub type NotifyReceiver = mpsc::UnboundedReceiver<NotifyMessage>;

#[must_use]
pub fn channel() -> (NotifySender, NotifyReceiver) {
  mpsc::unbounded_channel()
}
