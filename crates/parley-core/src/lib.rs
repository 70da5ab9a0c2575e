//! parley-core — shared wire types, framing, and configuration.
//! All other Parley crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{ChatMessage, PeerMessage};
pub use wire::{PeerRecord, RequestError, ResponseStatus, TrackerRequest, TrackerResponse};
