//! Parley integration test harness.
//!
//! Everything runs in-process on loopback: a tracker bound to an ephemeral
//! port, peers with fixed ids, and the HTTP bridge in front of the tracker.
//!
//!   cargo test --test integration

mod api;
mod overlay;
mod tracker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use parley_core::config::TrackerConfig;
use parley_core::ChatMessage;
use parley_peer::{ChannelSink, PeerOverlay, PeerSettings};
use parley_services::{SharedState, TrackerState};
use parley_tracker::{bind, TrackerServer};

// ── Harness ───────────────────────────────────────────────────────────────────

/// A tracker running on loopback. Dropping it stops the accept loop.
pub struct TestTracker {
    pub addr: SocketAddr,
    pub state: SharedState,
    _shutdown: broadcast::Sender<()>,
}

pub async fn start_tracker() -> Result<TestTracker> {
    let config = TrackerConfig {
        bind_addr: "127.0.0.1".into(),
        port: 0,
        request_timeout_secs: 2,
        ..TrackerConfig::default()
    };
    let listener = bind(&config).await?;
    let state = TrackerState::shared();
    let (shutdown, _) = broadcast::channel(1);
    let server = TrackerServer::new(listener, state.clone(), &config, shutdown.subscribe());
    let addr = server.local_addr()?;
    tokio::spawn(server.run());
    Ok(TestTracker {
        addr,
        state,
        _shutdown: shutdown,
    })
}

/// One raw tracker exchange: write `payload` as-is, half-close, read the
/// whole reply.
pub async fn raw_exchange(addr: SocketAddr, payload: &[u8]) -> Result<Value> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(payload).await?;
    stream.shutdown().await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    serde_json::from_slice(&buf).with_context(|| {
        format!("tracker reply is not JSON: {}", String::from_utf8_lossy(&buf))
    })
}

/// Framed request document.
pub async fn tracker_call(addr: SocketAddr, request: Value) -> Result<Value> {
    let mut payload = serde_json::to_vec(&request)?;
    payload.push(b'\n');
    raw_exchange(addr, &payload).await
}

pub fn peer_settings(tracker: SocketAddr, peer_id: &str, username: &str) -> PeerSettings {
    PeerSettings {
        peer_id: peer_id.into(),
        username: username.into(),
        listen_addr: "127.0.0.1".into(),
        listen_port: 0,
        advertise_ip: "127.0.0.1".into(),
        tracker_host: tracker.ip().to_string(),
        tracker_port: tracker.port(),
        tracker_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
    }
}

/// Start and register a peer whose chat lands in the returned receiver.
pub async fn start_peer(
    tracker: SocketAddr,
    peer_id: &str,
    username: &str,
) -> Result<(PeerOverlay, mpsc::UnboundedReceiver<ChatMessage>)> {
    let (sink, rx) = ChannelSink::new();
    let overlay = PeerOverlay::start(peer_settings(tracker, peer_id, username), Arc::new(sink)).await?;
    overlay.register().await?;
    Ok((overlay, rx))
}

/// Poll `condition` every 20 ms until it holds or `within` elapses.
pub async fn wait_until(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Next delivered chat, or `None` after `within`.
pub async fn next_chat(
    rx: &mut mpsc::UnboundedReceiver<ChatMessage>,
    within: Duration,
) -> Option<ChatMessage> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}
