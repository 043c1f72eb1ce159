//! Port allocation by bind probing.

use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr, TcpListener},
};

use crate::error::StarterError;

/// First free port in `[start, end]`, scanning upward.
///
/// A port is free when a listener can be bound on it and it is not in
/// `reserved` (ports already handed to registered federates that may not
/// have bound yet). The probe listener is dropped before returning.
///
/// # Errors
///
/// - `StarterError::NoFreePort` when every port is taken
pub fn find_free_port(start: u16, end: u16, reserved: &HashSet<u16>) -> Result<u16, StarterError> {
    (start..=end)
        .filter(|port| !reserved.contains(port))
        .find(|port| probe(*port))
        .ok_or(StarterError::NoFreePort { start, end })
}

fn probe(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).is_ok()
}
