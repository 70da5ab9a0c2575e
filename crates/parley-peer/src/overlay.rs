//! Peer overlay: tracker registration, channel membership, and direct
//! peer links.
//!
//! A `PeerOverlay` owns one listening socket and a table of live
//! connections keyed by remote peer id. Channel membership is advisory:
//! every chat message goes to every connected peer, and each receiver
//! decides what to show based on its own current channel.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};

use parley_core::config::PeerConfig;
use parley_core::wire::{encode_frame, TrackerRequest, TrackerResponse, DEFAULT_USERNAME};
use parley_core::{ChatMessage, PeerMessage};
use parley_services::{
    new_connection_table, remove_connection, snapshot, ConnectionTable, Direction,
    PeerConnection, TrackerClient, TrackerClientError,
};

use crate::handshake;
use crate::identity::{detect_local_ip, generate_peer_id};
use crate::listener::InboundListener;
use crate::sink::MessageSink;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("not registered with the tracker")]
    NotRegistered,
    #[error("peer overlay has been stopped")]
    Stopped,
    #[error("tracker rejected request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Tracker(#[from] TrackerClientError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub peer_id: String,
    pub username: String,
    pub listen_addr: String,
    /// 0 picks an ephemeral port; the bound port is what gets registered.
    pub listen_port: u16,
    pub advertise_ip: String,
    pub tracker_host: String,
    pub tracker_port: u16,
    pub tracker_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl PeerSettings {
    /// Fill blanks in `config` with a fresh peer id, the default username,
    /// and the detected local address.
    pub fn from_config(config: &PeerConfig) -> Self {
        let peer_id = if config.peer_id.trim().is_empty() {
            generate_peer_id()
        } else {
            config.peer_id.clone()
        };
        let username = if config.username.trim().is_empty() {
            DEFAULT_USERNAME.to_string()
        } else {
            config.username.clone()
        };
        let advertise_ip = if config.advertise_ip.trim().is_empty() {
            detect_local_ip().to_string()
        } else {
            config.advertise_ip.clone()
        };
        Self {
            peer_id,
            username,
            listen_addr: config.listen_addr.clone(),
            listen_port: config.listen_port,
            advertise_ip,
            tracker_host: config.tracker_host.clone(),
            tracker_port: config.tracker_port,
            tracker_timeout: config.tracker_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

// ── Channel membership ───────────────────────────────────────────────────────

/// Joined channels in join order, plus the one chat is shown for.
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    joined: Vec<String>,
    current: Option<String>,
}

impl ChannelState {
    /// Joining makes the channel current, even if already joined.
    fn join(&mut self, channel: &str) {
        if !self.joined.iter().any(|c| c == channel) {
            self.joined.push(channel.to_string());
        }
        self.current = Some(channel.to_string());
    }

    fn leave(&mut self, channel: &str) {
        self.joined.retain(|c| c != channel);
        if self.current.as_deref() == Some(channel) {
            self.current = self.joined.last().cloned();
        }
    }

    fn switch(&mut self, channel: &str) -> bool {
        if self.joined.iter().any(|c| c == channel) {
            self.current = Some(channel.to_string());
            true
        } else {
            false
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────────────────

/// State shared by the public handle, the inbound listener, and every
/// receive loop.
pub(crate) struct Shared {
    pub(crate) peer_id: String,
    pub(crate) username: String,
    pub(crate) advertise_ip: String,
    pub(crate) local_addr: SocketAddr,
    pub(crate) handshake_timeout: Duration,
    pub(crate) tracker: TrackerClient,
    pub(crate) connections: ConnectionTable,
    pub(crate) channels: RwLock<ChannelState>,
    pub(crate) sink: Arc<dyn MessageSink>,
    pub(crate) shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    registered: AtomicBool,
    next_conn_id: AtomicU64,
}

impl Shared {
    pub(crate) fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) async fn current_channel(&self) -> Option<String> {
        self.channels.read().await.current.clone()
    }

    /// Insert a handshaken connection. When one already exists for the same
    /// peer, both sides keep the link dialled by the lower peer id, so a
    /// simultaneous dial settles on one connection. A redial from the same
    /// initiator replaces the old link. Returns false if `conn` lost.
    pub(crate) fn install(&self, conn: PeerConnection) -> bool {
        match self.connections.entry(conn.peer_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
            Entry::Occupied(mut slot) => {
                let kept = self.initiator(slot.get());
                let offered = self.initiator(&conn);
                if kept < offered {
                    return false;
                }
                slot.insert(conn);
                true
            }
        }
    }

    fn initiator<'a>(&'a self, conn: &'a PeerConnection) -> &'a str {
        match conn.direction {
            Direction::Outbound => &self.peer_id,
            Direction::Inbound => &conn.peer_id,
        }
    }
}

// ── Public handle ────────────────────────────────────────────────────────────

/// Handle to a running peer. Clones share the same overlay.
#[derive(Clone)]
pub struct PeerOverlay {
    shared: Arc<Shared>,
}

impl PeerOverlay {
    /// Bind the peer listener and start accepting inbound links.
    pub async fn start(
        settings: PeerSettings,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, OverlayError> {
        let listener =
            TcpListener::bind((settings.listen_addr.as_str(), settings.listen_port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            peer_id: settings.peer_id,
            username: settings.username,
            advertise_ip: settings.advertise_ip,
            local_addr,
            handshake_timeout: settings.handshake_timeout,
            tracker: TrackerClient::new(
                &settings.tracker_host,
                settings.tracker_port,
                settings.tracker_timeout,
            ),
            connections: new_connection_table(),
            channels: RwLock::new(ChannelState::default()),
            sink,
            shutdown,
            running: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
        });

        let inbound = InboundListener::new(listener, shared.clone());
        tokio::spawn(inbound.run());

        tracing::info!(
            peer_id = %shared.peer_id,
            username = %shared.username,
            addr = %local_addr,
            "peer overlay started"
        );
        Ok(Self { shared })
    }

    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    pub fn username(&self) -> &str {
        &self.shared.username
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    // ── Tracker operations ───────────────────────────────────────────────────

    /// Announce this peer to the tracker under the advertise address and the
    /// bound listen port.
    pub async fn register(&self) -> Result<TrackerResponse, OverlayError> {
        self.ensure_running()?;
        let response = self
            .tracker_call(TrackerRequest::Register {
                peer_id: self.shared.peer_id.clone(),
                ip: self.shared.advertise_ip.clone(),
                port: self.shared.local_addr.port(),
                username: Some(self.shared.username.clone()),
            })
            .await?;
        self.shared.registered.store(true, Ordering::SeqCst);
        tracing::info!(tracker = %self.shared.tracker.addr(), "registered with tracker");
        Ok(response)
    }

    /// Join `channel` at the tracker, make it current, and connect to its
    /// members. Returns the number of new connections.
    pub async fn join_channel(&self, channel: &str) -> Result<usize, OverlayError> {
        self.ensure_registered()?;
        self.tracker_call(TrackerRequest::JoinChannel {
            peer_id: self.shared.peer_id.clone(),
            channel: channel.to_string(),
        })
        .await?;
        self.shared.channels.write().await.join(channel);
        tracing::info!(channel, "joined channel");
        self.discover(channel).await
    }

    /// Connect to every member of `channel` we are not already linked to.
    /// Unreachable peers are skipped.
    pub async fn discover(&self, channel: &str) -> Result<usize, OverlayError> {
        self.ensure_running()?;
        let response = self
            .tracker_call(TrackerRequest::GetPeers {
                channel: Some(channel.to_string()),
            })
            .await?;

        let mut connected = 0;
        for (peer_id, record) in response.peers.unwrap_or_default() {
            if peer_id == self.shared.peer_id || self.shared.connections.contains_key(&peer_id) {
                continue;
            }
            if self
                .connect_to_peer(&peer_id, &record.addr(), &record.username)
                .await
            {
                connected += 1;
            }
        }
        tracing::debug!(channel, connected, "discovery finished");
        Ok(connected)
    }

    /// Dial `addr`, send our handshake, and start receiving. False on any
    /// failure, including losing a duplicate-connection race.
    pub async fn connect_to_peer(&self, peer_id: &str, addr: &str, username: &str) -> bool {
        if !self.shared.is_running() || peer_id == self.shared.peer_id {
            return false;
        }
        match handshake::connect(&self.shared, peer_id, username, addr).await {
            Ok(installed) => installed,
            Err(e) => {
                tracing::warn!(peer_id, addr, error = %e, "failed to connect to peer");
                false
            }
        }
    }

    /// Leave `channel` at the tracker and locally. Existing connections stay
    /// open.
    pub async fn leave_channel(&self, channel: &str) -> Result<(), OverlayError> {
        self.ensure_registered()?;
        self.tracker_call(TrackerRequest::LeaveChannel {
            peer_id: self.shared.peer_id.clone(),
            channel: channel.to_string(),
        })
        .await?;
        self.shared.channels.write().await.leave(channel);
        tracing::info!(channel, "left channel");
        Ok(())
    }

    /// Channels the tracker lists for this peer.
    pub async fn tracker_channels(&self) -> Result<Vec<String>, OverlayError> {
        self.ensure_registered()?;
        let response = self
            .tracker_call(TrackerRequest::GetChannels {
                peer_id: self.shared.peer_id.clone(),
            })
            .await?;
        Ok(response.channels.unwrap_or_default())
    }

    // ── Local operations ─────────────────────────────────────────────────────

    /// Make an already-joined channel current. False if not joined.
    pub async fn switch_channel(&self, channel: &str) -> bool {
        self.shared.channels.write().await.switch(channel)
    }

    pub async fn current_channel(&self) -> Option<String> {
        self.shared.current_channel().await
    }

    pub async fn joined_channels(&self) -> Vec<String> {
        self.shared.channels.read().await.joined.clone()
    }

    /// Live connections, sorted by peer id.
    pub fn connected_peers(&self) -> Vec<PeerConnection> {
        let mut peers = snapshot(&self.shared.connections);
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.shared.connections.contains_key(peer_id)
    }

    /// Write a chat message tagged with `channel` to every connected peer.
    /// A failed write drops that connection. Returns the number of peers
    /// the message was written to.
    pub async fn send_message(&self, channel: &str, content: &str) -> Result<usize, OverlayError> {
        self.ensure_running()?;
        let frame = encode_frame(&PeerMessage::Chat(ChatMessage {
            channel: channel.to_string(),
            peer_id: self.shared.peer_id.clone(),
            username: self.shared.username.clone(),
            content: content.to_string(),
        }))?;

        let mut delivered = 0;
        for conn in snapshot(&self.shared.connections) {
            match conn.send(&frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(peer_id = %conn.peer_id, error = %e, "send failed, dropping connection");
                    remove_connection(&self.shared.connections, &conn.peer_id, conn.conn_id);
                }
            }
        }
        tracing::debug!(channel, delivered, "chat sent");
        Ok(delivered)
    }

    /// Stop accepting, log out if registered, and close every connection.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.shutdown.send(());

        if self.shared.registered.swap(false, Ordering::SeqCst) {
            let logout = TrackerRequest::Logout {
                peer_id: self.shared.peer_id.clone(),
            };
            if let Err(e) = self.shared.tracker.request(&logout).await {
                tracing::warn!(error = %e, "logout failed");
            }
        }

        for conn in snapshot(&self.shared.connections) {
            conn.close().await;
        }
        self.shared.connections.clear();
        tracing::info!(peer_id = %self.shared.peer_id, "peer overlay stopped");
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), OverlayError> {
        if self.shared.is_running() {
            Ok(())
        } else {
            Err(OverlayError::Stopped)
        }
    }

    fn ensure_registered(&self) -> Result<(), OverlayError> {
        self.ensure_running()?;
        if self.is_registered() {
            Ok(())
        } else {
            Err(OverlayError::NotRegistered)
        }
    }

    async fn tracker_call(&self, request: TrackerRequest) -> Result<TrackerResponse, OverlayError> {
        let response = self.shared.tracker.request(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            tracing::warn!(method = request.method(), message = response.error_message(), "tracker rejected request");
            Err(OverlayError::Rejected(response.error_message().to_string()))
        }
    }
}
