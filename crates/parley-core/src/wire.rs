//! Parley tracker wire format.
//!
//! Every document on the wire is one line of compact JSON terminated by
//! `\n`. The tracker protocol is connection-per-request: the client writes a
//! single [`TrackerRequest`] frame, the tracker answers with a single
//! [`TrackerResponse`] frame and closes the connection.
//!
//! Decoding is two-stage so that error text stays stable for clients: the
//! `method` tag is checked by hand first, then the variant is decoded with
//! defaulted fields and validated. Empty strings and port 0 count as missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Framing ──────────────────────────────────────────────────────────────────

/// Terminates every frame on both protocols.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Largest tracker request the tracker will read.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Largest tracker response a client will read (a full `get_peers` listing).
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Largest peer-to-peer message a receive loop will read.
pub const MAX_PEER_MESSAGE_BYTES: usize = 64 * 1024;

pub const DEFAULT_TRACKER_PORT: u16 = 7000;
pub const DEFAULT_LISTEN_PORT: u16 = 9001;
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Serialize `value` as one frame: compact JSON plus the delimiter.
///
/// Compact serde_json output escapes control characters inside strings, so
/// the delimiter can only ever appear at the end.
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = serde_json::to_vec(value)?;
    buf.push(FRAME_DELIMITER);
    Ok(buf)
}

/// Strip the delimiter and any trailing whitespace (`\r\n` senders).
pub fn trim_frame(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    &frame[..end]
}

// ── Peer record ──────────────────────────────────────────────────────────────

/// A registered peer as the tracker knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    /// Address the peer accepts direct connections on.
    pub ip: String,
    pub port: u16,
    /// Display name. Not unique.
    pub username: String,
    /// Unix timestamp in milliseconds of the latest (re-)registration.
    pub registered_at: u64,
}

impl PeerRecord {
    /// `ip:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TrackerRequest {
    Register {
        #[serde(default)]
        peer_id: String,
        #[serde(default)]
        ip: String,
        #[serde(default)]
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    GetPeers {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    JoinChannel {
        #[serde(default)]
        peer_id: String,
        #[serde(default)]
        channel: String,
    },
    LeaveChannel {
        #[serde(default)]
        peer_id: String,
        #[serde(default)]
        channel: String,
    },
    GetChannels {
        #[serde(default)]
        peer_id: String,
    },
    Logout {
        #[serde(default)]
        peer_id: String,
    },
}

impl TrackerRequest {
    pub const METHODS: [&'static str; 6] = [
        "register",
        "get_peers",
        "join_channel",
        "leave_channel",
        "get_channels",
        "logout",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::GetPeers { .. } => "get_peers",
            Self::JoinChannel { .. } => "join_channel",
            Self::LeaveChannel { .. } => "leave_channel",
            Self::GetChannels { .. } => "get_channels",
            Self::Logout { .. } => "logout",
        }
    }

    /// Reject requests with missing required fields. Nothing is mutated
    /// for a request that fails here.
    pub fn validate(&self) -> Result<(), RequestError> {
        let missing = match self {
            Self::Register { peer_id, ip, port, .. } => {
                (blank(peer_id) || blank(ip) || *port == 0).then_some("fields: peer_id, ip, port")
            }
            Self::GetPeers { .. } => None,
            Self::JoinChannel { peer_id, channel } | Self::LeaveChannel { peer_id, channel } => {
                (blank(peer_id) || blank(channel)).then_some("fields: peer_id, channel")
            }
            Self::GetChannels { peer_id } | Self::Logout { peer_id } => {
                blank(peer_id).then_some("field: peer_id")
            }
        };
        match missing {
            Some(fields) => Err(RequestError::MissingFields(fields)),
            None => Ok(()),
        }
    }
}

fn blank(s: &str) -> bool {
    s.is_empty()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Request must be a JSON object")]
    NotAnObject,
    #[error("Missing required field: method")]
    MissingMethod,
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Missing required {0}")]
    MissingFields(&'static str),
    #[error("Invalid request: {0}")]
    Invalid(String),
}

/// Decode and validate one tracker request frame.
pub fn decode_request(frame: &[u8]) -> Result<TrackerRequest, RequestError> {
    let value: serde_json::Value =
        serde_json::from_slice(trim_frame(frame)).map_err(|_| RequestError::InvalidJson)?;

    let method = match value.as_object().ok_or(RequestError::NotAnObject)?.get("method") {
        Some(serde_json::Value::String(m)) => m.clone(),
        Some(other) => other.to_string(),
        None => return Err(RequestError::MissingMethod),
    };
    if !TrackerRequest::METHODS.contains(&method.as_str()) {
        return Err(RequestError::UnknownMethod(method));
    }

    let request: TrackerRequest =
        serde_json::from_value(value).map_err(|e| RequestError::Invalid(e.to_string()))?;
    request.validate()?;
    Ok(request)
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Tracker reply. Which optional fields are present depends on the method;
/// absent fields are omitted from the wire. `channel` is doubly optional so
/// that `get_peers` can answer an explicit `null` for the unfiltered listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<BTreeMap<String, PeerRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl TrackerResponse {
    /// Bare success, no fields set.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            peer_id: None,
            username: None,
            peers: None,
            channel: None,
            channels: None,
            count: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn error_message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }
}
