//! Connection setup in both directions. The dialling side speaks first
//! with one `handshake` frame; the accepting side answers nothing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;

use parley_core::message::UNKNOWN_USERNAME;
use parley_core::wire::MAX_PEER_MESSAGE_BYTES;
use parley_core::PeerMessage;
use parley_services::{read_frame, write_frame, Direction, PeerConnection};

use crate::overlay::Shared;
use crate::receiver;

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

/// Dial `addr`, identify ourselves, and hand the link to a receive loop.
/// `Ok(false)` means an existing link to the same peer was kept instead.
pub(crate) async fn connect(
    shared: &Arc<Shared>,
    peer_id: &str,
    username: &str,
    addr: &str,
) -> io::Result<bool> {
    let stream = timeout(shared.handshake_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| timed_out("connect"))??;
    let remote_addr = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();

    let hello = PeerMessage::handshake(&shared.peer_id, &shared.username);
    timeout(shared.handshake_timeout, write_frame(&mut write_half, &hello))
        .await
        .map_err(|_| timed_out("handshake"))??;

    let conn = PeerConnection::new(
        shared.next_conn_id(),
        peer_id.to_string(),
        username.to_string(),
        remote_addr,
        Direction::Outbound,
        write_half,
    );
    Ok(receiver::attach(shared, conn, BufReader::new(read_half)))
}

/// Wait for the remote's handshake, then hand the link to a receive loop.
/// Anything other than a valid handshake in time closes the socket without
/// a reply.
pub(crate) async fn accept(shared: Arc<Shared>, stream: TcpStream, remote_addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let frame = match timeout(
        shared.handshake_timeout,
        read_frame(&mut reader, MAX_PEER_MESSAGE_BYTES),
    )
    .await
    {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            tracing::debug!(%remote_addr, "closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(%remote_addr, error = %e, "handshake read failed");
            return;
        }
        Err(_) => {
            tracing::debug!(%remote_addr, "handshake timed out");
            return;
        }
    };

    let (peer_id, username) = match PeerMessage::decode(&frame) {
        Some(PeerMessage::Handshake { peer_id, username }) if !peer_id.trim().is_empty() => {
            (peer_id, username)
        }
        _ => {
            tracing::debug!(%remote_addr, "invalid handshake");
            return;
        }
    };
    let username = if username.is_empty() {
        UNKNOWN_USERNAME.to_string()
    } else {
        username
    };
    if peer_id == shared.peer_id {
        tracing::debug!(%remote_addr, "refusing connection from self");
        return;
    }

    let conn = PeerConnection::new(
        shared.next_conn_id(),
        peer_id,
        username,
        remote_addr,
        Direction::Inbound,
        write_half,
    );
    receiver::attach(&shared, conn, reader);
}
