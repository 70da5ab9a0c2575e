//! Peer connection table: live peer-to-peer links keyed by remote peer id.
//!
//! Entries are inserted after a handshake and removed by the connection's
//! receive loop when the transport closes, or by a sender when a write
//! fails. Removal always matches on `conn_id` so a stale loop can never
//! evict the connection that replaced it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Which side dialled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One established link. Cheap to clone; clones share the write half.
#[derive(Clone)]
pub struct PeerConnection {
    /// Locally unique, distinguishes successive links to the same peer.
    pub conn_id: u64,
    pub peer_id: String,
    pub username: String,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    pub established_at: Instant,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl PeerConnection {
    pub fn new(
        conn_id: u64,
        peer_id: String,
        username: String,
        remote_addr: SocketAddr,
        direction: Direction,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self {
            conn_id,
            peer_id,
            username,
            remote_addr,
            direction,
            established_at: Instant::now(),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one already-encoded frame.
    pub async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    /// Shut down our write direction; the remote sees EOF.
    pub async fn close(&self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::debug!(peer_id = %self.peer_id, error = %e, "shutdown failed");
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("conn_id", &self.conn_id)
            .field("peer_id", &self.peer_id)
            .field("username", &self.username)
            .field("remote_addr", &self.remote_addr)
            .field("direction", &self.direction)
            .finish()
    }
}

/// The connection table, shared by the acceptor, the receive loops, and
/// the sender.
pub type ConnectionTable = Arc<DashMap<String, PeerConnection>>;

/// Create a new empty connection table.
pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

/// Remove `peer_id` only if the entry is still connection `conn_id`.
pub fn remove_connection(table: &ConnectionTable, peer_id: &str, conn_id: u64) -> bool {
    table
        .remove_if(peer_id, |_, conn| conn.conn_id == conn_id)
        .is_some()
}

/// Clone every entry out of the table, so no shard lock is held across
/// an await.
pub fn snapshot(table: &ConnectionTable) -> Vec<PeerConnection> {
    table.iter().map(|entry| entry.value().clone()).collect()
}
