//! Event transport over a Unix domain socket
//!
//! The downstream pipeline connects to the daemon's socket and receives
//! converted key events as JSON lines. Primary events carry a non-zero
//! `response_id` which the client must acknowledge exactly once:
//!
//! ```text
//!  daemon → client   {"type":"key_event","response_id":7,"event":{...}}
//!  client → daemon   {"type":"ack","response_id":7,"handled":true}
//! ```
//!
//! Synthesized events are sent with `response_id` 0 and are never
//! acknowledged.
//!
//! Only one client is served at a time. While no client is connected, and
//! for anything still in flight when a client goes away, primary events are
//! acknowledged locally as unhandled so the converter never waits forever.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keysync_core::{KeyEventSink, OutboundKeyEvent, ResponseId};
use nix::libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

// ============================================================================
// Wire Messages
// ============================================================================

/// A single JSON line on the transport socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A converted key event, daemon to client
    KeyEvent {
        /// `0` for synthesized events
        response_id: ResponseId,
        event: OutboundKeyEvent,
    },
    /// Acknowledgment of a primary event, client to daemon
    Ack {
        response_id: ResponseId,
        handled: bool,
    },
}

/// An acknowledgment on its way back to the converter.
pub type Ack = (ResponseId, bool);

// ============================================================================
// Converter Sink
// ============================================================================

/// [`KeyEventSink`] that hands events to the transport task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl KeyEventSink for ChannelSink {
    fn send(&mut self, event: &OutboundKeyEvent, response_id: Option<ResponseId>) {
        let message = Message::KeyEvent {
            response_id: response_id.unwrap_or(ResponseId::NONE),
            event: event.clone(),
        };
        if self.tx.send(message).is_err() {
            tracing::warn!("Transport task has stopped, dropping key event");
        }
    }
}

// ============================================================================
// Transport Server
// ============================================================================

/// Unix socket server delivering key events to one client at a time.
///
/// The socket file is removed when the server is dropped.
pub struct TransportServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Primary events sent to this client and not yet acknowledged
    in_flight: HashSet<ResponseId>,
}

impl TransportServer {
    /// Bind the socket at `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(socket_path).with_context(|| {
                format!("Failed to remove stale socket file: {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(socket_path).with_context(|| {
            format!("Failed to create transport socket at {}", socket_path.display())
        })?;

        tracing::info!("Transport listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/keysync.sock`, or `/tmp/keysync-$UID.sock` when the
    /// runtime directory is not set.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(runtime_dir).join("keysync.sock")
        } else {
            tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/keysync-{}.sock", uid))
        }
    }

    /// Serve until the outbound channel closes.
    ///
    /// Events from `outbound` go to the connected client; its acknowledgments,
    /// and the local ones, go to `acks`.
    pub async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        acks: mpsc::UnboundedSender<Ack>,
    ) -> Result<()> {
        let mut client: Option<Client> = None;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted.context("Failed to accept transport connection")?;
                    if let Some(previous) = client.take() {
                        tracing::warn!("New client connected, dropping the previous one");
                        release(previous, &acks);
                    }
                    tracing::info!("Client connected");
                    let (reader, writer) = stream.into_split();
                    client = Some(Client {
                        lines: BufReader::new(reader).lines(),
                        writer,
                        in_flight: HashSet::new(),
                    });
                }
                message = outbound.recv() => {
                    let Some(message) = message else {
                        tracing::debug!("Outbound channel closed, stopping transport");
                        if let Some(previous) = client.take() {
                            release(previous, &acks);
                        }
                        return Ok(());
                    };
                    if let Err(e) = deliver(&mut client, message, &acks).await {
                        tracing::warn!("Client write failed: {:#}", e);
                        if let Some(previous) = client.take() {
                            release(previous, &acks);
                        }
                    }
                }
                line = next_line(&mut client) => {
                    match line {
                        Ok(Some(line)) => receive(&mut client, &line, &acks),
                        Ok(None) => {
                            tracing::info!("Client disconnected");
                            if let Some(previous) = client.take() {
                                release(previous, &acks);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Client read failed: {}", e);
                            if let Some(previous) = client.take() {
                                release(previous, &acks);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove transport socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed transport socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

async fn next_line(client: &mut Option<Client>) -> std::io::Result<Option<String>> {
    match client {
        Some(client) => client.lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn deliver(
    client: &mut Option<Client>,
    message: Message,
    acks: &mpsc::UnboundedSender<Ack>,
) -> Result<()> {
    let response_id = match &message {
        Message::KeyEvent { response_id, .. } => *response_id,
        Message::Ack { .. } => ResponseId::NONE,
    };

    let Some(client) = client else {
        if !response_id.is_none() {
            tracing::trace!("No client connected, acknowledging {} locally", response_id);
            let _ = acks.send((response_id, false));
        }
        return Ok(());
    };

    if !response_id.is_none() {
        client.in_flight.insert(response_id);
    }

    let mut json = serde_json::to_string(&message).context("Failed to serialize key event")?;
    json.push('\n');
    tracing::debug!("Sending: {}", json.trim_end());

    client
        .writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write key event")?;
    client.writer.flush().await.context("Failed to flush key event")?;

    Ok(())
}

fn receive(client: &mut Option<Client>, line: &str, acks: &mpsc::UnboundedSender<Ack>) {
    let Some(client) = client else {
        return;
    };

    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<Message>(line) {
        Ok(Message::Ack { response_id, handled }) => {
            if client.in_flight.remove(&response_id) {
                let _ = acks.send((response_id, handled));
            } else {
                tracing::warn!("Ignoring acknowledgment for unknown response {}", response_id);
            }
        }
        Ok(other) => {
            tracing::warn!("Unexpected message from client: {:?}", other);
        }
        Err(e) => {
            tracing::warn!("Failed to parse client message: {}", e);
        }
    }
}

/// Acknowledge everything a departing client left unanswered.
fn release(client: Client, acks: &mpsc::UnboundedSender<Ack>) {
    if !client.in_flight.is_empty() {
        tracing::info!(
            "Acknowledging {} unanswered event(s) as unhandled",
            client.in_flight.len()
        );
    }
    let mut ids: Vec<_> = client.in_flight.into_iter().collect();
    ids.sort();
    for id in ids {
        let _ = acks.send((id, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysync_core::{KeyEventKind, LogicalKey, PhysicalKey};
    use tempfile::TempDir;
    use tokio::net::UnixStream;

    fn key_event(logical: u64, synthesized: bool) -> OutboundKeyEvent {
        OutboundKeyEvent {
            timestamp_us: 10,
            kind: KeyEventKind::Down,
            physical: PhysicalKey(0x0007_0004),
            logical: LogicalKey(logical),
            text: None,
            synthesized,
        }
    }

    // ========================================================================
    // Message Serialization Tests
    // ========================================================================

    #[test]
    fn test_key_event_serialization() {
        let message = Message::KeyEvent {
            response_id: ResponseId(3),
            event: key_event(0x61, false),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"key_event","response_id":3,"event":{"timestamp_us":10,"kind":"down","physical":458756,"logical":97,"synthesized":false}}"#
        );
    }

    #[test]
    fn test_ack_deserialization() {
        let json = r#"{"type": "ack", "response_id": 12, "handled": true}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(
            message,
            Message::Ack {
                response_id: ResponseId(12),
                handled: true
            }
        );
    }

    #[test]
    fn test_channel_sink_maps_none_to_zero() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);

        sink.send(&key_event(0x61, true), None);
        sink.send(&key_event(0x62, false), Some(ResponseId(4)));

        match rx.try_recv().unwrap() {
            Message::KeyEvent { response_id, .. } => assert!(response_id.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Message::KeyEvent { response_id, event } => {
                assert_eq!(response_id, ResponseId(4));
                assert_eq!(event.logical, LogicalKey(0x62));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    // ========================================================================
    // Server Tests
    // ========================================================================

    #[tokio::test]
    async fn test_server_creation_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("keysync.sock");

        let server = TransportServer::bind(&socket_path).unwrap();
        assert_eq!(server.socket_path(), socket_path.as_path());
        assert!(socket_path.exists());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_removes_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("keysync.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        let server = TransportServer::bind(&socket_path).unwrap();
        assert!(socket_path.exists());
        drop(server);
    }

    #[tokio::test]
    async fn test_local_ack_without_client() {
        let temp_dir = TempDir::new().unwrap();
        let server = TransportServer::bind(&temp_dir.path().join("keysync.sock")).unwrap();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(server.run(out_rx, ack_tx));

        let mut sink = ChannelSink::new(out_tx.clone());
        sink.send(&key_event(0x61, true), None);
        sink.send(&key_event(0x61, false), Some(ResponseId(1)));

        assert_eq!(ack_rx.recv().await, Some((ResponseId(1), false)));

        drop(sink);
        drop(out_tx);
        task.await.unwrap().unwrap();
        assert!(ack_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("keysync.sock");
        let server = TransportServer::bind(&socket_path).unwrap();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(server.run(out_rx, ack_tx));

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Give the server a moment to register the client
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        out_tx
            .send(Message::KeyEvent {
                response_id: ResponseId(5),
                event: key_event(0x61, false),
            })
            .unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let received: Message = serde_json::from_str(&line).unwrap();
        assert!(matches!(
            received,
            Message::KeyEvent { response_id: ResponseId(5), .. }
        ));

        // An ack for an id never sent is dropped; the real one goes through
        writer
            .write_all(b"{\"type\":\"ack\",\"response_id\":99,\"handled\":true}\n")
            .await
            .unwrap();
        writer
            .write_all(b"{\"type\":\"ack\",\"response_id\":5,\"handled\":true}\n")
            .await
            .unwrap();
        assert_eq!(ack_rx.recv().await, Some((ResponseId(5), true)));

        drop(out_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_releases_in_flight() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("keysync.sock");
        let server = TransportServer::bind(&socket_path).unwrap();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(server.run(out_rx, ack_tx));

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        for id in [1, 2] {
            out_tx
                .send(Message::KeyEvent {
                    response_id: ResponseId(id),
                    event: key_event(0x61, false),
                })
                .unwrap();
        }
        lines.next_line().await.unwrap().unwrap();
        lines.next_line().await.unwrap().unwrap();

        drop(lines);

        assert_eq!(ack_rx.recv().await, Some((ResponseId(1), false)));
        assert_eq!(ack_rx.recv().await, Some((ResponseId(2), false)));

        drop(out_tx);
        task.await.unwrap().unwrap();
    }
}
