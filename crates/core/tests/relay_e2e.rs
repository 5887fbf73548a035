//! End-to-end boundary scenarios over real loopback sockets.

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::directory::SessionDirectory;
use relay_core::logsink::LogSink;
use relay_core::room::RoomRegistry;
use relay_core::session::{self, SharedState};
use relay_core::{queue, worker};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

struct TestServer {
  addr: SocketAddr,
  shutdown: broadcast::Sender<()>,
  _log_dir: tempfile::TempDir,
  // Kept alive but never polled when `worker_count == 0`, so the queue's
  // capacity alone determines backpressure instead of a closed-channel error.
  _idle_upload_rx: Option<queue::UploadReceiver>,
}

async fn start_server(worker_count: usize) -> TestServer {
  let log_dir = tempfile::tempdir().unwrap();
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  let directory = Arc::new(SessionDirectory::new());
  let rooms = Arc::new(RoomRegistry::new());
  let log = Arc::new(LogSink::open(log_dir.path()));
  let (upload_tx, upload_rx) = queue::channel();
  let idle_upload_rx = if worker_count > 0 {
    worker::spawn_pool(worker_count, upload_rx, Arc::clone(&directory), Arc::clone(&log));
    None
  } else {
    Some(upload_rx)
  };

  let state = SharedState { directory, rooms, uploads: upload_tx, log };
  let (shutdown_tx, _) = broadcast::channel::<()>(1);
  let shutdown_tx_accept = shutdown_tx.clone();

  tokio::spawn(async move {
    loop {
      let Ok((socket, peer)) = listener.accept().await else { return };
      let state = state.clone();
      let rx = shutdown_tx_accept.subscribe();
      tokio::spawn(session::run(socket, peer, state, rx));
    }
  });

  TestServer { addr, shutdown: shutdown_tx, _log_dir: log_dir, _idle_upload_rx: idle_upload_rx }
}

struct Client {
  reader: BufReader<OwnedReadHalf>,
  writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
  async fn connect(addr: SocketAddr) -> Self {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    Client { reader: BufReader::new(read), writer: write }
  }

  async fn read_line(&mut self) -> String {
    let mut line = String::new();
    self.reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
  }

  async fn read_exact(&mut self, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    self.reader.read_exact(&mut buf).await.unwrap();
    buf
  }

  async fn send(&mut self, line: &str) {
    self.writer.write_all(line.as_bytes()).await.unwrap();
    self.writer.write_all(b"\n").await.unwrap();
    self.writer.flush().await.unwrap();
  }

  async fn send_bytes(&mut self, bytes: &[u8]) {
    self.writer.write_all(bytes).await.unwrap();
    self.writer.flush().await.unwrap();
  }

  async fn register(addr: SocketAddr, name: &str) -> Self {
    let mut client = Self::connect(addr).await;
    client.send(name).await;
    let ack = client.read_line().await;
    assert!(ack.starts_with("[OK]"), "got: {ack}");
    client
  }
}

#[tokio::test]
async fn duplicate_name_is_rejected_then_a_fresh_name_succeeds() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;

  let mut second = Client::connect(server.addr).await;
  second.send("alice").await;
  let reply = second.read_line().await;
  assert!(reply.contains("already taken"), "got: {reply}");

  second.send("bob").await;
  let ack = second.read_line().await;
  assert!(ack.starts_with("[OK]"), "got: {ack}");

  second.send("/join lobby").await;
  let joined = second.read_line().await;
  assert!(joined.starts_with("[OK] User \"bob\" joined the room: lobby"), "got: {joined}");

  alice.send("/exit").await;
}

#[tokio::test]
async fn invalid_username_reprompts_on_the_same_connection() {
  let server = start_server(1).await;
  let mut client = Client::connect(server.addr).await;

  client.send("not_alnum!").await;
  let reply = client.read_line().await;
  assert!(reply.contains("1-16 alphanumeric"), "got: {reply}");

  client.send("alice").await;
  let ack = client.read_line().await;
  assert!(ack.starts_with("[OK]"), "got: {ack}");
}

#[tokio::test]
async fn room_membership_caps_at_fifteen() {
  let server = start_server(1).await;
  let mut clients = Vec::new();
  for i in 0..15 {
    let mut c = Client::register(server.addr, &format!("user{i}")).await;
    c.send("/join lobby").await;
    let reply = c.read_line().await;
    assert!(reply.starts_with("[OK] User"), "member {i} got: {reply}");
    clients.push(c);
  }

  let mut overflow = Client::register(server.addr, "overflow").await;
  overflow.send("/join lobby").await;
  let reply = overflow.read_line().await;
  assert!(reply.contains("full"), "got: {reply}");
}

#[tokio::test]
async fn joining_a_second_room_leaves_the_first() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  let mut bob = Client::register(server.addr, "bob").await;

  alice.send("/join r1").await;
  alice.read_line().await;
  bob.send("/join r1").await;
  bob.read_line().await;

  alice.send("/join r2").await;
  alice.read_line().await;

  // alice is no longer in r1, so bob's broadcast there reaches only bob.
  bob.send("/broadcast hello r1").await;
  assert_eq!(bob.read_line().await, "[OK]");
  let received = bob.read_line().await;
  assert_eq!(received, "[bob] hello r1");
}

#[tokio::test]
async fn broadcast_fans_out_to_every_room_member_including_the_sender() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  let mut bob = Client::register(server.addr, "bob").await;

  alice.send("/join lobby").await;
  alice.read_line().await;
  bob.send("/join lobby").await;
  bob.read_line().await;

  alice.send("/broadcast hello room").await;
  assert_eq!(alice.read_line().await, "[OK]");
  assert_eq!(alice.read_line().await, "[alice] hello room");
  assert_eq!(bob.read_line().await, "[alice] hello room");
}

#[tokio::test]
async fn leave_without_a_room_is_informational_not_an_error() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  alice.send("/leave").await;
  let reply = alice.read_line().await;
  assert_eq!(reply, "[INFO] not in any room");
}

#[tokio::test]
async fn broadcast_without_a_room_is_rejected() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  alice.send("/broadcast hi").await;
  let reply = alice.read_line().await;
  assert_eq!(reply, "[ERROR] Join a room first");
}

#[tokio::test]
async fn whisper_to_self_is_rejected() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  alice.send("/whisper alice hi me").await;
  let reply = alice.read_line().await;
  assert!(reply.contains("Cannot whisper to yourself"), "got: {reply}");
}

#[tokio::test]
async fn whisper_to_an_offline_user_is_rejected() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  alice.send("/whisper ghost hi").await;
  let reply = alice.read_line().await;
  assert_eq!(reply, "[ERROR] not online");
}

#[tokio::test]
async fn whisper_delivers_only_to_the_named_recipient() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  let mut bob = Client::register(server.addr, "bob").await;

  alice.send("/whisper bob psst").await;
  assert_eq!(alice.read_line().await, "[OK]");
  let received = bob.read_line().await;
  assert_eq!(received, "[alice] psst");
}

#[tokio::test]
async fn file_upload_arrives_byte_identical() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  let mut bob = Client::register(server.addr, "bob").await;

  let payload = vec![7u8; 4096];
  alice.send("/sendfile notes.txt bob 4096").await;
  alice.send_bytes(&payload).await;
  let reply = alice.read_line().await;
  assert_eq!(reply, "[OK]");

  let header = bob.read_line().await;
  assert_eq!(header, "[FILE notes.txt 4096 alice]");
  let received = bob.read_exact(4096).await;
  assert_eq!(received, payload);
}

#[tokio::test]
async fn upload_to_a_departed_recipient_is_dropped_silently() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;
  {
    let mut carol = Client::register(server.addr, "carol").await;
    carol.send("/exit").await;
  }

  alice.send("/sendfile notes.txt carol 4").await;
  alice.send_bytes(b"data").await;
  let reply = alice.read_line().await;
  assert_eq!(reply, "[OK]");
}

#[tokio::test]
async fn upload_queue_backpressure_blocks_until_a_slot_frees() {
  // No worker drains the queue, so the 6th enqueue can only proceed once
  // the test itself pulls an item off the raw receiver.
  let server = start_server(0).await;
  let mut alice = Client::register(server.addr, "alice").await;
  let mut bob = Client::register(server.addr, "bob").await;
  bob.send("/join lobby").await;
  bob.read_line().await;

  for i in 0..5 {
    alice.send(&format!("/sendfile file{i}.txt bob 4")).await;
    alice.send_bytes(b"data").await;
    let reply = alice.read_line().await;
    assert_eq!(reply, "[OK]", "upload {i} got: {reply}");
  }

  alice.send("/sendfile overflow.txt bob 4").await;
  alice.send_bytes(b"data").await;
  let informational = alice.read_line().await;
  assert!(informational.contains("queued"), "got: {informational}");

  // The sixth enqueue is now suspended waiting for a free slot; the
  // connection is still alive and can still be asked other things.
  bob.send("/leave").await;
  let leave_reply = bob.read_line().await;
  assert_eq!(leave_reply, "[INFO] left room: lobby");
}

#[tokio::test]
async fn graceful_shutdown_notifies_connected_clients() {
  let server = start_server(1).await;
  let mut alice = Client::register(server.addr, "alice").await;

  server.shutdown.send(()).unwrap();
  let reply = alice.read_line().await;
  assert_eq!(reply, "[SERVER] shutting down. Goodbye.");
}
