//! Peer-to-peer message schema.
//!
//! A peer connection carries exactly one `handshake` followed by any number
//! of `chat` messages, each framed as one JSON line.

use serde::{Deserialize, Serialize};

/// Shown for a handshake that carries no username.
pub const UNKNOWN_USERNAME: &str = "Unknown";
/// Channel assumed for a chat that carries none.
pub const UNKNOWN_CHANNEL: &str = "unknown";

/// One message on a peer-to-peer connection, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// First message on a new connection; identifies the dialling peer.
    /// `peer_id` is required, `username` may be left out.
    Handshake {
        peer_id: String,
        #[serde(default)]
        username: String,
    },
    Chat(ChatMessage),
}

/// A chat payload. The channel tag is informational: senders broadcast to
/// every connection and receivers filter on it for display. Missing fields
/// decode as empty; see [`ChatMessage::with_sender_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub channel: String,
    pub peer_id: String,
    pub username: String,
    pub content: String,
}

impl ChatMessage {
    /// Console rendering: `[<username> @<channel>]> <content>`.
    pub fn display_line(&self) -> String {
        format!("[{} @{}]> {}", self.username, self.channel, self.content)
    }

    /// Fill empty fields for a message received on the link to `from`:
    /// the channel becomes `unknown`, sender id and name become `from`.
    pub fn with_sender_defaults(mut self, from: &str) -> Self {
        if self.channel.is_empty() {
            self.channel = UNKNOWN_CHANNEL.to_string();
        }
        if self.peer_id.is_empty() {
            self.peer_id = from.to_string();
        }
        if self.username.is_empty() {
            self.username = from.to_string();
        }
        self
    }
}

impl PeerMessage {
    pub fn handshake(peer_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self::Handshake {
            peer_id: peer_id.into(),
            username: username.into(),
        }
    }

    /// Decode one frame. Returns `None` for malformed frames and unknown
    /// `type` values; receivers ignore those.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        serde_json::from_slice(crate::wire::trim_frame(frame)).ok()
    }
}
