//! Tracker listener: one request per accepted connection.
//!
//! Each connection runs on its own task; a semaphore caps how many are in
//! flight. A permit is taken before `accept`, so clients beyond the cap
//! wait in the OS backlog instead of piling up as idle tasks.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;

use parley_core::config::TrackerConfig;
use parley_core::wire::{decode_request, TrackerResponse};
use parley_services::{read_frame, write_frame, SharedState, TrackerClient};

/// Bind the tracker socket with `SO_REUSEADDR` and the configured backlog.
pub async fn bind(config: &TrackerConfig) -> Result<TcpListener> {
    let addr = tokio::net::lookup_host((config.bind_addr.as_str(), config.port))
        .await
        .with_context(|| format!("failed to resolve {}", config.bind_addr))?
        .next()
        .with_context(|| format!("no address for {}", config.bind_addr))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind tracker on {addr}"))?;
    Ok(socket.listen(config.backlog)?)
}

/// Client for the tracker listening on `addr`, as seen from the same host.
/// A wildcard bind address is reached over loopback.
pub fn local_client(addr: SocketAddr, timeout: Duration) -> TrackerClient {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    TrackerClient::new(&ip.to_string(), addr.port(), timeout)
}

/// Per-connection read limits.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub request_timeout: Duration,
    pub max_request_bytes: usize,
}

impl From<&TrackerConfig> for RequestLimits {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_request_bytes: config.max_request_bytes,
        }
    }
}

pub struct TrackerServer {
    listener: TcpListener,
    state: SharedState,
    limiter: Arc<Semaphore>,
    limits: RequestLimits,
    shutdown: broadcast::Receiver<()>,
}

impl TrackerServer {
    pub fn new(
        listener: TcpListener,
        state: SharedState,
        config: &TrackerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            state,
            limiter: Arc::new(Semaphore::new(config.max_connections.max(1))),
            limits: RequestLimits::from(config),
            shutdown,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "tracker listening");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("tracker shutting down");
                    return Ok(());
                }
                permit = self.limiter.clone().acquire_owned() => {
                    permit.context("connection limiter closed")?
                }
            };

            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("tracker shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let state = self.state.clone();
            let limits = self.limits;
            tokio::spawn(async move {
                let _permit = permit;
                handle_connection(stream, peer_addr, state, limits).await;
            });
        }
    }
}

/// Serve exactly one request on `stream`, then close it. Every failure is
/// turned into an error response or a dropped connection; nothing here can
/// affect other connections.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: SharedState,
    limits: RequestLimits,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let read = timeout(
        limits.request_timeout,
        read_frame(&mut reader, limits.max_request_bytes),
    )
    .await;

    let response = match read {
        Err(_) => {
            tracing::warn!(%peer_addr, "request timed out");
            TrackerResponse::error("Request timed out")
        }
        Ok(Ok(None)) => {
            tracing::debug!(%peer_addr, "connection closed before request");
            return;
        }
        Ok(Ok(Some(frame))) => respond(&frame, &state, peer_addr).await,
        Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
            tracing::warn!(%peer_addr, error = %e, "oversize request");
            TrackerResponse::error("Request too large")
        }
        Ok(Err(e)) => {
            tracing::debug!(%peer_addr, error = %e, "failed to read request");
            return;
        }
    };

    if let Err(e) = write_frame(&mut write_half, &response).await {
        tracing::debug!(%peer_addr, error = %e, "failed to send response");
        return;
    }
    if let Err(e) = write_half.shutdown().await {
        tracing::trace!(%peer_addr, error = %e, "shutdown after response failed");
    }
}

async fn respond(frame: &[u8], state: &SharedState, peer_addr: SocketAddr) -> TrackerResponse {
    match decode_request(frame) {
        Ok(request) => {
            tracing::debug!(%peer_addr, method = request.method(), "request received");
            state.lock().await.apply(request)
        }
        Err(e) => {
            tracing::warn!(%peer_addr, error = %e, "rejected request");
            TrackerResponse::error(e.to_string())
        }
    }
}

/// Periodically log registry size.
pub async fn snapshot_loop(state: SharedState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let state = state.lock().await;
        tracing::info!(
            peers = state.peer_count(),
            channels = state.channel_count(),
            "tracker snapshot"
        );
    }
}
