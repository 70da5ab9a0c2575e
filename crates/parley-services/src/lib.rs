//! parley-services — tracker state, the tracker client, and the peer
//! connection table shared by the tracker and peer daemons.

pub mod connection;
pub mod framing;
pub mod registry;
pub mod tracker_client;

pub use connection::{
    new_connection_table, remove_connection, snapshot, ConnectionTable, Direction, PeerConnection,
};
pub use framing::{read_frame, write_frame};
pub use registry::{SharedState, TrackerState};
pub use tracker_client::{TrackerClient, TrackerClientError};
