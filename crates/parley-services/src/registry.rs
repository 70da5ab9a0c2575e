//! Tracker state: the peer registry and the channel index.
//!
//! One [`TrackerState`] per tracker process, shared behind a single mutex.
//! Every request, read or write, holds that lock for its whole critical
//! section, so all observed states form one sequential history.
//!
//! Channel membership does not imply registration: a logged-out peer id is
//! removed from channels by `logout`, but a peer that simply disappears
//! stays listed until someone removes it. `get_peers` skips such ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use parley_core::wire::{PeerRecord, TrackerRequest, TrackerResponse, DEFAULT_USERNAME};

/// Shared tracker state.
pub type SharedState = Arc<Mutex<TrackerState>>;

#[derive(Debug, Default)]
pub struct TrackerState {
    peers: HashMap<String, PeerRecord>,
    /// Invariant: no entry has an empty member set.
    channels: BTreeMap<String, BTreeSet<String>>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Execute one request. Invalid requests leave the state untouched.
    pub fn apply(&mut self, request: TrackerRequest) -> TrackerResponse {
        if let Err(e) = request.validate() {
            return TrackerResponse::error(e.to_string());
        }

        match request {
            TrackerRequest::Register {
                peer_id,
                ip,
                port,
                username,
            } => {
                let record = self.register(peer_id, ip, port, username);
                TrackerResponse {
                    peer_id: Some(record.peer_id.clone()),
                    username: Some(record.username.clone()),
                    ..TrackerResponse::success("Peer registered successfully")
                }
            }
            TrackerRequest::GetPeers { channel } => {
                let channel = channel.filter(|c| !c.is_empty());
                let peers = self.peers(channel.as_deref());
                TrackerResponse {
                    count: Some(peers.len()),
                    peers: Some(peers),
                    channel: Some(channel),
                    ..TrackerResponse::ok()
                }
            }
            TrackerRequest::JoinChannel { peer_id, channel } => {
                self.join(&peer_id, &channel);
                let message = format!("Joined channel: {channel}");
                TrackerResponse {
                    channel: Some(Some(channel)),
                    ..TrackerResponse::success(message)
                }
            }
            TrackerRequest::LeaveChannel { peer_id, channel } => {
                self.leave(&peer_id, &channel);
                let message = format!("Left channel: {channel}");
                TrackerResponse {
                    channel: Some(Some(channel)),
                    ..TrackerResponse::success(message)
                }
            }
            TrackerRequest::GetChannels { peer_id } => {
                let channels = self.channels_of(&peer_id);
                TrackerResponse {
                    count: Some(channels.len()),
                    channels: Some(channels),
                    ..TrackerResponse::ok()
                }
            }
            TrackerRequest::Logout { peer_id } => {
                self.logout(&peer_id);
                TrackerResponse::success("Logged out successfully")
            }
        }
    }

    /// Insert or overwrite the record for `peer_id`.
    pub fn register(
        &mut self,
        peer_id: String,
        ip: String,
        port: u16,
        username: Option<String>,
    ) -> &PeerRecord {
        let username = username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string());

        tracing::info!(peer_id = %peer_id, %username, ip = %ip, port, "peer registered");

        let record = PeerRecord {
            peer_id: peer_id.clone(),
            ip,
            port,
            username,
            registered_at: now_millis(),
        };
        self.peers.insert(peer_id.clone(), record);
        &self.peers[&peer_id]
    }

    /// Registered members of `channel` when it exists, otherwise every
    /// registered peer.
    pub fn peers(&self, channel: Option<&str>) -> BTreeMap<String, PeerRecord> {
        match channel.and_then(|c| self.channels.get(c)) {
            Some(members) => members
                .iter()
                .filter_map(|id| self.peers.get(id).map(|r| (id.clone(), r.clone())))
                .collect(),
            None => self
                .peers
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
        }
    }

    /// Add `peer_id` to `channel`, creating it. Returns false if already a member.
    pub fn join(&mut self, peer_id: &str, channel: &str) -> bool {
        let added = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(peer_id.to_string());
        tracing::info!(peer_id, channel, added, "peer joined channel");
        added
    }

    /// Remove `peer_id` from `channel`, dropping the channel once empty.
    /// Returns false if it was not a member.
    pub fn leave(&mut self, peer_id: &str, channel: &str) -> bool {
        let Some(members) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(peer_id);
        if members.is_empty() {
            self.channels.remove(channel);
            tracing::debug!(channel, "channel emptied and removed");
        }
        tracing::info!(peer_id, channel, removed, "peer left channel");
        removed
    }

    /// Channels containing `peer_id`, sorted.
    pub fn channels_of(&self, peer_id: &str) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, members)| members.contains(peer_id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop the record and every membership of `peer_id`.
    /// Returns true if a record existed.
    pub fn logout(&mut self, peer_id: &str) -> bool {
        let existed = self.peers.remove(peer_id).is_some();
        self.channels.retain(|_, members| {
            members.remove(peer_id);
            !members.is_empty()
        });
        tracing::info!(peer_id, existed, "peer logged out");
        existed
    }

    pub fn record(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn members(&self, channel: &str) -> Option<&BTreeSet<String>> {
        self.channels.get(channel)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
