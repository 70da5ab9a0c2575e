//! parley-peer — the chat peer: tracker registration, channel membership,
//! and direct JSON-line links to other peers.

mod handshake;
pub mod identity;
mod listener;
pub mod overlay;
mod receiver;
pub mod sink;

pub use overlay::{OverlayError, PeerOverlay, PeerSettings};
pub use sink::{ChannelSink, MessageSink, StdoutSink};
