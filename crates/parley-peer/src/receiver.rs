//! Per-connection receive loop.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;

use parley_core::wire::MAX_PEER_MESSAGE_BYTES;
use parley_core::PeerMessage;
use parley_services::{read_frame, remove_connection, PeerConnection};

use crate::overlay::Shared;

/// Install `conn` and spawn its receive loop. False if the connection lost
/// the duplicate race or the overlay stopped meanwhile; `conn` and `reader`
/// are dropped, which closes the socket.
pub(crate) fn attach(
    shared: &Arc<Shared>,
    conn: PeerConnection,
    reader: BufReader<OwnedReadHalf>,
) -> bool {
    // Subscribe before the running check so a concurrent stop is never missed.
    let shutdown = shared.shutdown.subscribe();
    let peer_id = conn.peer_id.clone();
    let conn_id = conn.conn_id;
    let direction = conn.direction;
    let username = conn.username.clone();

    if !shared.install(conn) {
        tracing::debug!(%peer_id, ?direction, "duplicate connection dropped");
        return false;
    }
    if !shared.is_running() {
        remove_connection(&shared.connections, &peer_id, conn_id);
        return false;
    }

    tracing::info!(%peer_id, %username, ?direction, "peer connected");
    tokio::spawn(receive_loop(shared.clone(), peer_id, conn_id, reader, shutdown));
    true
}

async fn receive_loop(
    shared: Arc<Shared>,
    peer_id: String,
    conn_id: u64,
    mut reader: BufReader<OwnedReadHalf>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = read_frame(&mut reader, MAX_PEER_MESSAGE_BYTES) => frame,
        };
        match frame {
            Ok(Some(frame)) => dispatch(&shared, &peer_id, &frame).await,
            Ok(None) => {
                tracing::debug!(%peer_id, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::debug!(%peer_id, error = %e, "receive failed");
                break;
            }
        }
    }

    if remove_connection(&shared.connections, &peer_id, conn_id) {
        tracing::info!(%peer_id, "peer disconnected");
    }
}

async fn dispatch(shared: &Shared, from: &str, frame: &[u8]) {
    match PeerMessage::decode(frame) {
        Some(PeerMessage::Chat(message)) => {
            let message = message.with_sender_defaults(from);
            if shared.current_channel().await.as_deref() == Some(message.channel.as_str()) {
                shared.sink.deliver(&message);
            } else {
                tracing::debug!(from, channel = %message.channel, "chat for inactive channel dropped");
            }
        }
        Some(PeerMessage::Handshake { .. }) => {
            tracing::debug!(from, "repeated handshake ignored");
        }
        None => tracing::debug!(from, "undecodable frame ignored"),
    }
}
