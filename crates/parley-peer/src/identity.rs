//! Local identity: peer id generation and the address we advertise.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Eight hex chars from four random bytes. Collisions are the caller's
/// problem; the tracker trusts whatever id it is given.
pub fn generate_peer_id() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

/// Address of the interface that routes to the outside world, found by
/// connecting a UDP socket (no packet is sent). Falls back to loopback.
pub fn detect_local_ip() -> IpAddr {
    let routed = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match routed() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            tracing::debug!(error = %e, "local address detection failed, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
