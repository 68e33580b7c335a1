//! Address utilities (§4.2): comparing, classifying, formatting, and
//! constructing socket addresses out of the ARRAY8 address/port pairs that
//! XDMCP carries on the wire.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// XDMCP's default UDP port, used whenever a `ForwardQuery`/`ManagedForward`
/// payload omits the port bytes.
pub const DEFAULT_PORT: u16 = 177;

/// Family-aware address equality: an IPv4 address and its IPv4-mapped IPv6
/// form compare equal, so a forwarded query matched against the display
/// that originated it does not false-negative just because one side came in
/// over the IPv6 wildcard socket (§4.2, P6).
pub fn equal(a: &SocketAddr, b: &SocketAddr) -> bool {
    if a.port() != b.port() {
        return false;
    }

    to_canonical_v4(a.ip()) == to_canonical_v4(b.ip())
}

fn to_canonical_v4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
    }
}

/// `addr` matches any address bound on any local interface. Per §1/§9 this
/// is distinct from [`is_loopback`]: it is what admission rule 4 means by
/// "local-origin", not merely 127.0.0.0/8.
pub fn is_local(addr: &SocketAddr, local_addrs: &[SocketAddr]) -> bool {
    local_addrs
        .iter()
        .any(|local| to_canonical_v4(local.ip()) == to_canonical_v4(addr.ip()))
}

/// 127.0.0.0/8 or ::1 — used only by the indirect-chooser workaround in
/// §4.8/§9, never for admission.
pub fn is_loopback(addr: &SocketAddr) -> bool {
    match to_canonical_v4(addr.ip()) {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Numeric `(host, port)` strings, for logging and for embedding in wire
/// ARRAY8 fields (Willing's hostname, for instance).
pub fn format(addr: &SocketAddr) -> (String, u16) {
    (addr.ip().to_string(), addr.port())
}

/// Build a sockaddr out of the wire representation used by ForwardQuery and
/// MANAGED_FORWARD: a 4- or 16-byte address and an optional 2-byte port
/// (defaulting to [`DEFAULT_PORT`] when absent). When `family_hint` is IPv6
/// and the address is 4 bytes, the result is the IPv4-mapped IPv6 form
/// (the AI_V4MAPPED-equivalent conversion called for in §4.2).
pub fn from_request(
    addr_bytes: &[u8],
    port_bytes: Option<&[u8]>,
    family_hint: AddressFamily,
) -> Option<SocketAddr> {
    let port = match port_bytes {
        Some(bytes) if bytes.len() == 2 => u16::from_be_bytes([bytes[0], bytes[1]]),
        Some(_) => return None,
        None => DEFAULT_PORT,
    };

    let ip = match addr_bytes.len() {
        4 => {
            let v4 = Ipv4Addr::new(addr_bytes[0], addr_bytes[1], addr_bytes[2], addr_bytes[3]);
            match family_hint {
                AddressFamily::V6 => IpAddr::V6(v4.to_ipv6_mapped()),
                AddressFamily::V4 => IpAddr::V4(v4),
            }
        }
        16 => {
            let octets: [u8; 16] = addr_bytes.try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}

/// Hint used by [`from_request`] to decide whether a 4-byte address should
/// be widened to its IPv4-mapped IPv6 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Encode a sockaddr's address as ARRAY8-ready bytes (4 for IPv4, 16 for
/// IPv6), the inverse of the address half of [`from_request`].
pub fn addr_bytes(addr: &SocketAddr) -> Vec<u8> {
    match addr.ip() {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
