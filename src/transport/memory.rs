//! In-process transport
//!
//! Every successful `connect` hands the server side of the connection, a
//! [`MemoryPeer`], to whoever holds the [`MemoryListener`]. The peer plays the
//! broker: it reads the client's frames and writes frames back.

use crate::error::{RealtimeError, Result};
use crate::protocol::{Command, Frame, FrameParser, HeartBeat, Inbound};
use crate::transport::{Connector, TransportLink};

use async_trait::async_trait;
use futures::channel::mpsc as chan;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Client-side connector backed by in-memory channels
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    fail_next: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

/// Receives the server side of each new connection
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection
pub struct MemoryPeer {
    url: String,
    from_client: chan::UnboundedReceiver<String>,
    to_client: chan::UnboundedSender<Result<String>>,
    parser: FrameParser,
    pending: VecDeque<Inbound>,
    message_seq: AtomicU64,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            fail_next: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryListener { peers: rx })
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RealtimeError::Connection(format!("{} refused the connection", url)));
        }

        let (client_tx, from_client) = chan::unbounded::<String>();
        let (to_client, client_rx) = chan::unbounded::<Result<String>>();

        let peer = MemoryPeer {
            url: url.to_string(),
            from_client,
            to_client,
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            message_seq: AtomicU64::new(0),
        };
        self.peers
            .send(peer)
            .map_err(|_| RealtimeError::Connection("no listener for memory transport".into()))?;

        Ok(TransportLink {
            outbound: Box::pin(
                client_tx.sink_map_err(|e| RealtimeError::Transport(e.to_string())),
            ),
            inbound: Box::pin(client_rx),
        })
    }
}

impl MemoryListener {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// A connection that is already waiting, if any
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send raw text to the client; false once the client hung up
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.unbounded_send(Ok(text.into())).is_ok()
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_raw(frame.encode())
    }

    /// Surface a transport error on the client's inbound stream
    pub fn fail(&self, message: &str) -> bool {
        self.to_client
            .unbounded_send(Err(RealtimeError::Transport(message.to_string())))
            .is_ok()
    }

    /// Deliver a MESSAGE frame on `destination`
    pub fn deliver(&self, subscription: &str, destination: &str, body: &str) -> bool {
        let seq = self.message_seq.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .header("message-id", seq.to_string())
            .header("content-type", "application/json")
            .with_body(body);
        self.send_frame(&frame)
    }

    /// Next unit from the client; `None` once the client dropped the link
    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Some(unit);
            }
            let text = self.from_client.next().await?;
            let parsed = self.parser.push(text.as_bytes());
            for e in &parsed.errors {
                debug!(error = %e, "Memory peer dropped undecodable data");
            }
            self.pending.extend(parsed.units);
        }
    }

    /// Next frame from the client, skipping heartbeats
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.next_inbound().await? {
                Inbound::Frame(frame) => return Some(frame),
                Inbound::Heartbeat => continue,
            }
        }
    }

    /// Read CONNECT and answer CONNECTED advertising `heart_beat`
    ///
    /// Returns the client's CONNECT frame.
    pub async fn accept_stomp(&mut self, heart_beat: HeartBeat) -> Option<Frame> {
        let connect = self.next_frame().await?;
        if connect.command != Command::Connect && connect.command != Command::Stomp {
            return None;
        }
        let connected = Frame::new(Command::Connected)
            .header("version", "1.2")
            .header("server", "memory")
            .header("heart-beat", heart_beat.header_value());
        self.send_frame(&connected).then_some(connect)
    }

    /// Answer the handshake with an ERROR frame instead
    pub async fn reject_stomp(&mut self, message: &str) -> Option<Frame> {
        let connect = self.next_frame().await?;
        let error = Frame::new(Command::Error)
            .header("message", message)
            .with_body(message);
        self.send_frame(&error).then_some(connect)
    }
}
