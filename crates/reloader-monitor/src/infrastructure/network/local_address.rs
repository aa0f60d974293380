//! Default bind address discovery.
//!
//! The monitor should listen on the machine's private LAN address so phones
//! and emulators on the same network can reach it.  The OS already knows
//! which interface it would use to reach the outside world, so we ask it:
//! "connect" a UDP socket to a public address and read back the local end.
//!
//! # Why UDP connect sends nothing (for beginners)
//!
//! UDP is connectionless.  Calling `connect` on a UDP socket only records the
//! default destination and makes the kernel pick a route and source address.
//! No packet leaves the machine until `send` is called, which we never do.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Address used only to make the OS choose an outbound route.
const ROUTE_PROBE_TARGET: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 65530);

/// Returns the primary private IPv4 address, or `127.0.0.1` when none is found.
pub fn default_private_ipv4() -> Ipv4Addr {
    match outbound_ipv4() {
        Some(ip) => ip,
        None => {
            debug!("no routable IPv4 address found; falling back to loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}

fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_PROBE_TARGET).ok()?;
    let local = socket.local_addr().ok()?;
    accept_candidate(local.ip())
}

/// Keeps only usable IPv4 addresses.
fn accept_candidate(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}
