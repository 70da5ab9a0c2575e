//! Tracker client: one connection per request, bounded by a timeout.
//!
//! The tracker is treated as possibly slow or unreachable: every round trip
//! (connect, write, read) runs under a single deadline and fails closed.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use parley_core::wire::{TrackerRequest, TrackerResponse, MAX_RESPONSE_BYTES};

use crate::framing::{read_frame, write_frame};

#[derive(Debug, thiserror::Error)]
pub enum TrackerClientError {
    #[error("Tracker server timeout")]
    Timeout,
    #[error("Failed to connect to tracker: {0}")]
    Io(#[from] io::Error),
    #[error("invalid tracker response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("tracker closed connection without a response")]
    EmptyResponse,
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: String,
    timeout: Duration,
    max_response_bytes: usize,
}

impl TrackerClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let addr = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Self {
            addr,
            timeout,
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Typed round trip. An error *response* from the tracker is `Ok`;
    /// callers check [`TrackerResponse::is_success`].
    pub async fn request(
        &self,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse, TrackerClientError> {
        let value = serde_json::to_value(request)?;
        let reply = self.send_value(&value).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Untyped round trip: the request document goes out and the reply comes
    /// back exactly as the tracker wrote them.
    pub async fn send_value(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, TrackerClientError> {
        match timeout(self.timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tracker = %self.addr, "tracker request timed out");
                Err(TrackerClientError::Timeout)
            }
        }
    }

    async fn round_trip(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, TrackerClientError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        write_frame(&mut write_half, request).await?;
        write_half.shutdown().await?;

        let mut reader = BufReader::new(read_half);
        let frame = read_frame(&mut reader, self.max_response_bytes)
            .await?
            .ok_or(TrackerClientError::EmptyResponse)?;

        tracing::trace!(tracker = %self.addr, len = frame.len(), "tracker response received");
        Ok(serde_json::from_slice(&frame)?)
    }
}
