use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::channel::CommandChannel;
use crate::constants::KEEPALIVE_INTERVAL_SECS;
use crate::protocol::{Command, Info, Message};

/// WebSocket link to the relay server
pub struct SyncClient {
    shared: Arc<Shared>,
}

struct Shared {
    outbox: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    membership: Mutex<Membership>,
    traffic: Mutex<Traffic>,
}

#[derive(Default)]
struct Membership {
    room_id: Option<String>,
    client_id: Option<Uuid>,
}

#[derive(Default)]
struct Traffic {
    frames_out: u64,
    bytes_out: u64,
    frames_in: u64,
    bytes_in: u64,
    last_frame_at: Option<Instant>,
    /// Outstanding keep-alive ping and when it left.
    pending_ping: Option<(u64, Instant)>,
    rtt_ms: Option<f32>,
    linked_at: Option<Instant>,
    endpoint: Option<String>,
}

impl Traffic {
    fn sent(&mut self, bytes: usize) {
        self.frames_out += 1;
        self.bytes_out += bytes as u64;
        self.last_frame_at = Some(Instant::now());
    }

    fn received(&mut self, bytes: usize) {
        self.frames_in += 1;
        self.bytes_in += bytes as u64;
        self.last_frame_at = Some(Instant::now());
    }

    fn ping(&mut self) -> u64 {
        let nonce = Uuid::new_v4().as_u128() as u64;
        self.pending_ping = Some((nonce, Instant::now()));
        nonce
    }

    /// Pongs that do not echo the outstanding nonce are ignored.
    fn pong(&mut self, payload: &[u8]) {
        let Some(bytes) = payload.get(..8) else {
            return;
        };
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(bytes);
        let nonce = u64::from_le_bytes(nonce);

        if let Some((expected, sent_at)) = self.pending_ping {
            if expected == nonce {
                self.rtt_ms = Some(sent_at.elapsed().as_secs_f32() * 1000.0);
                self.pending_ping = None;
            }
        }
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            frames_out: self.frames_out,
            bytes_out: self.bytes_out,
            frames_in: self.frames_in,
            bytes_in: self.bytes_in,
            rtt_ms: self.rtt_ms,
            idle_secs: self.last_frame_at.map(|at| at.elapsed().as_secs_f32()),
            linked_secs: self.linked_at.map(|at| at.elapsed().as_secs_f32()),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Point-in-time view of link traffic
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStats {
    pub frames_out: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub bytes_in: u64,
    pub rtt_ms: Option<f32>,
    pub idle_secs: Option<f32>,
    pub linked_secs: Option<f32>,
    pub endpoint: Option<String>,
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                outbox: Mutex::new(None),
                membership: Mutex::new(Membership::default()),
                traffic: Mutex::new(Traffic::default()),
            }),
        }
    }

    /// Open the link and start its pump task. Every parsed server message is
    /// passed to `on_message`; the returned receiver resolves once the link
    /// is gone.
    pub async fn connect<F>(&self, server_url: &str, on_message: F) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(Message) + Send + 'static,
    {
        let (socket, _) = connect_async(server_url)
            .await
            .with_context(|| format!("Failed to reach {server_url}"))?;
        let (mut sink, mut stream) = socket.split();

        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.shared.outbox.lock() = Some(outbox_tx);
        let (closed_tx, closed_rx) = oneshot::channel();

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
            keepalive.tick().await;

            loop {
                tokio::select! {
                    outgoing = outbox_rx.recv() => {
                        let Some(frame) = outgoing else {
                            // Outbox closed locally and drained.
                            if let Err(e) = sink.close().await {
                                tracing::debug!("WebSocket close failed: {}", e);
                            }
                            break;
                        };
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!("WebSocket send failed: {}", e);
                            break;
                        }
                    }
                    incoming = stream.next() => match incoming {
                        Some(Ok(frame)) => {
                            if !shared.on_frame(frame, &on_message) {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket receive error: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = keepalive.tick() => {
                        let nonce = shared.traffic.lock().ping();
                        let payload = nonce.to_le_bytes().to_vec();
                        shared.traffic.lock().sent(payload.len());
                        if sink.send(WsMessage::Ping(payload.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            shared.detach();
            let _ = closed_tx.send(());
        });

        Ok(closed_rx)
    }

    /// Stop accepting frames. Frames already queued are written before the
    /// close frame; await the receiver from [`SyncClient::connect`] to know
    /// when that happened.
    pub fn close(&self) {
        self.shared.outbox.lock().take();
    }

    /// Record which endpoint the link reached.
    pub fn mark_connected(&self, label: &str) {
        let mut traffic = self.shared.traffic.lock();
        traffic.linked_at = Some(Instant::now());
        traffic.endpoint = Some(label.to_string());
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.traffic.lock().stats()
    }

    pub fn room_id(&self) -> Option<String> {
        self.shared.membership.lock().room_id.clone()
    }

    pub fn client_id(&self) -> Option<Uuid> {
        self.shared.membership.lock().client_id
    }

    fn send_message(&self, msg: Message) -> Result<()> {
        let json = serde_json::to_string(&msg).context("Failed to encode message")?;
        self.shared.traffic.lock().sent(json.len());
        let outbox = self
            .shared
            .outbox
            .lock()
            .clone()
            .context("Not connected to a sync server")?;
        outbox
            .send(WsMessage::Text(json.into()))
            .context("Sync connection already closed")
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Returns `false` once the server closed the link.
    fn on_frame<F: Fn(Message)>(&self, frame: WsMessage, on_message: &F) -> bool {
        match frame {
            WsMessage::Text(text) => {
                self.traffic.lock().received(text.len());
                match serde_json::from_str::<Message>(&text) {
                    Ok(msg) => {
                        self.track(&msg);
                        on_message(msg);
                    }
                    Err(e) => tracing::warn!("Dropping unparseable message: {}", e),
                }
                true
            }
            WsMessage::Pong(payload) => {
                let mut traffic = self.traffic.lock();
                traffic.received(payload.len());
                traffic.pong(&payload);
                true
            }
            WsMessage::Close(_) => false,
            _ => true,
        }
    }

    fn track(&self, msg: &Message) {
        let mut membership = self.membership.lock();
        match msg {
            Message::RoomJoined {
                room_id, client_id, ..
            } => {
                membership.room_id = Some(room_id.clone());
                membership.client_id = Some(*client_id);
            }
            Message::RoomLeft => membership.room_id = None,
            _ => {}
        }
    }

    fn detach(&self) {
        *self.outbox.lock() = None;
        let mut traffic = self.traffic.lock();
        traffic.pending_ping = None;
        traffic.linked_at = None;
    }
}

impl CommandChannel for SyncClient {
    fn join_room(&self, room_id: &str, observe_only: bool) -> Result<()> {
        self.send_message(Message::JoinRoom {
            room_id: room_id.to_string(),
            observe_only,
        })
    }

    fn leave_room(&self) -> Result<()> {
        self.send_message(Message::LeaveRoom)
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        self.send_message(Message::Command(command.clone()))
    }

    fn request_info(&self) -> Result<()> {
        self.send_message(Message::RequestInfo)
    }

    fn send_info(&self, requester: Uuid, info: &Info) -> Result<()> {
        self.send_message(Message::ProvideInfo {
            requester,
            info: info.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_send_without_connection_fails() {
        let client = SyncClient::new();
        assert!(client.send_command(&Command::play(None)).is_err());
        // Attempts still count as outgoing traffic.
        assert_eq!(client.stats().frames_out, 1);
    }

    #[test]
    fn test_text_frames_track_membership() {
        let client = SyncClient::new();
        let seen = AtomicUsize::new(0);
        let count = |_: Message| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        let client_id = Uuid::new_v4();
        let joined = serde_json::to_string(&Message::RoomJoined {
            room_id: "movie-night".into(),
            client_id,
            members: 2,
        })
        .unwrap();

        assert!(client.shared.on_frame(WsMessage::Text(joined.into()), &count));
        assert_eq!(client.room_id().as_deref(), Some("movie-night"));
        assert_eq!(client.client_id(), Some(client_id));

        let left = serde_json::to_string(&Message::RoomLeft).unwrap();
        assert!(client.shared.on_frame(WsMessage::Text(left.into()), &count));
        assert_eq!(client.room_id(), None);

        assert!(client
            .shared
            .on_frame(WsMessage::Text("not json".into()), &count));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(client.stats().frames_in, 3);

        assert!(!client.shared.on_frame(WsMessage::Close(None), &count));
    }

    #[tokio::test]
    async fn test_close_flushes_queued_leave() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut texts = Vec::new();
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    WsMessage::Text(text) => texts.push(text.as_str().to_owned()),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            texts
        });

        let client = SyncClient::new();
        let closed = client
            .connect(&format!("ws://{addr}"), |_| {})
            .await
            .unwrap();
        client.leave_room().unwrap();
        client.close();
        closed.await.unwrap();

        let texts = relay.await.unwrap();
        assert_eq!(texts.len(), 1);
        assert!(matches!(
            serde_json::from_str::<Message>(&texts[0]).unwrap(),
            Message::LeaveRoom
        ));
        assert!(client.send_command(&Command::play(None)).is_err());
    }

    #[test]
    fn test_pong_measures_rtt_for_matching_nonce() {
        let mut traffic = Traffic::default();
        let nonce = traffic.ping();

        traffic.pong(&nonce.wrapping_add(1).to_le_bytes());
        assert!(traffic.rtt_ms.is_none());
        traffic.pong(&[1, 2, 3]);
        assert!(traffic.rtt_ms.is_none());

        traffic.pong(&nonce.to_le_bytes());
        assert!(traffic.rtt_ms.is_some());
        assert!(traffic.pending_ping.is_none());
    }
}
