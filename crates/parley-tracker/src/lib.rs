//! parley-tracker — the tracker service: registry of peers and channels,
//! answering one JSON request per connection.

pub mod server;

pub use server::{bind, handle_connection, local_client, snapshot_loop, RequestLimits, TrackerServer};
