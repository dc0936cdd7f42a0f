//! Shared helpers: the test plays the broker over the in-memory transport

#![allow(dead_code)]

use fintrack_realtime::protocol::{Command, Frame, HeartBeat};
use fintrack_realtime::transport::{MemoryConnector, MemoryListener, MemoryPeer};
use fintrack_realtime::{Payload, Session, SessionConfig, Topic};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn config() -> SessionConfig {
    SessionConfig::new("memory://broker")
        .no_heartbeat()
        .reconnect_delay(Duration::from_millis(50))
}

pub fn session(config: SessionConfig) -> (Session, MemoryConnector, MemoryListener) {
    let (connector, listener) = MemoryConnector::new();
    let session = Session::with_connector(config, connector.clone());
    (session, connector, listener)
}

/// Accept the next connection and complete the handshake
pub async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
    accept_with(listener, HeartBeat::default()).await
}

pub async fn accept_with(listener: &mut MemoryListener, heart_beat: HeartBeat) -> MemoryPeer {
    let mut peer = timeout(WAIT, listener.accept())
        .await
        .expect("no connection attempt")
        .expect("listener closed");
    peer.accept_stomp(heart_beat)
        .await
        .expect("handshake failed");
    peer
}

/// Activate `session` while answering as the broker
pub async fn connect(session: &Session, listener: &mut MemoryListener) -> MemoryPeer {
    let (activated, peer) = tokio::join!(session.activate(), accept(listener));
    activated.expect("activate failed");
    peer
}

pub async fn next_frame(peer: &mut MemoryPeer) -> Frame {
    timeout(WAIT, peer.next_frame())
        .await
        .expect("no frame from client")
        .expect("client hung up")
}

/// Read `n` SUBSCRIBE frames, returning (wire id, destination) sorted by destination
pub async fn subscribes(peer: &mut MemoryPeer, n: usize) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for _ in 0..n {
        let frame = next_frame(peer).await;
        assert_eq!(frame.command, Command::Subscribe, "unexpected {:?}", frame);
        out.push((
            frame.get("id").unwrap().to_string(),
            frame.destination().unwrap().to_string(),
        ));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    out
}

/// Wait until `cond` holds
pub async fn eventually<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Callback that records every delivery
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, Payload)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(&Topic, &Payload) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |topic: &Topic, payload: &Payload| {
            seen.lock().push((topic.to_string(), payload.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.seen.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}
