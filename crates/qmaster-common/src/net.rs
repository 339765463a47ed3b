// net.rs -- address predicates and address-string parsing
//
// Pure address logic, no sockets. Listen addresses and mapping rules arrive
// as strings ("host", "host:port", "[v6]:port") and are resolved here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

// =============================================================================
// Predicates
// =============================================================================

/// Returns true for 127.0.0.0/8 and ::1.
pub fn is_loopback(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.octets()[0] == 127,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

// =============================================================================
// Address parsing
// =============================================================================

/// Parse a listen address string into a socket address.
///
/// Supports:
/// - "1.2.3.4" or "1.2.3.4:27950" -> IPv4
/// - "[::1]" or "[::1]:27950" -> IPv6
/// - "hostname" or "hostname:27950" -> DNS resolution
///
/// An address without a port gets `default_port`.
pub fn parse_listen_address(s: &str, default_port: u16) -> Option<SocketAddr> {
    // Already a complete socket address?
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(addr);
    }

    // Bare IP without a port
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, default_port));
    }

    // Bracketed IPv6 without a port
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Some(SocketAddr::new(ip, default_port));
        }
    }

    // Hostname, with or without a port
    let (host, port) = split_host_port(s)?;
    let port = port.unwrap_or(default_port);
    resolve_host(host, port)
}

/// Resolve an address string to an IPv4 socket address, for mapping rules.
/// The name may include a port number after a ':'; the port defaults to 0
/// and must be non-zero when given.
pub fn resolve_ipv4(name: &str) -> Option<SocketAddrV4> {
    let (host, port) = split_host_port(name)?;
    let port = match port {
        Some(0) => return None,
        Some(p) => p,
        None => 0,
    };

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(SocketAddrV4::new(ip, port));
    }

    // DNS: keep the first IPv4 result
    let addrs = (host, 0u16).to_socket_addrs().ok()?;
    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Some(SocketAddrV4::new(*v4.ip(), port));
        }
    }
    None
}

/// Split "host" or "host:port" into the host and an optional parsed port.
/// Returns None when the port part is present but not a number.
fn split_host_port(s: &str) -> Option<(&str, Option<u16>)> {
    match s.rsplit_once(':') {
        // More than one ':' means a bare IPv6 literal, not a host:port pair
        Some((host, _)) if host.contains(':') => Some((s, None)),
        Some((host, port)) => {
            let port = port.parse::<u16>().ok()?;
            Some((host, Some(port)))
        }
        None => Some((s, None)),
    }
}

/// Resolve a hostname to its first address, IPv4 or IPv6.
fn resolve_host(host: &str, port: u16) -> Option<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs().ok()?;
    addrs.next()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    // -------------------------------------------------------
    // is_loopback
    // -------------------------------------------------------

    #[test]
    fn loopback_ipv4_127_x() {
        assert!(is_loopback(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_loopback(&IpAddr::V4(Ipv4Addr::new(127, 1, 2, 3))));
    }

    #[test]
    fn loopback_ipv4_public() {
        assert!(!is_loopback(&IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))));
        assert!(!is_loopback(&IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn loopback_ipv6() {
        assert!(is_loopback(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(!is_loopback(&IpAddr::V6("2001:db8::1".parse().unwrap())));
    }

    // -------------------------------------------------------
    // parse_listen_address
    // -------------------------------------------------------

    #[test]
    fn listen_ipv4_with_port() {
        let a = parse_listen_address("10.0.0.1:27960", 27950).unwrap();
        assert_eq!(a, "10.0.0.1:27960".parse().unwrap());
    }

    #[test]
    fn listen_ipv4_default_port() {
        let a = parse_listen_address("10.0.0.1", 27950).unwrap();
        assert_eq!(a.port(), 27950);
        assert_eq!(a.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn listen_ipv6_bracketed() {
        let a = parse_listen_address("[::1]:27960", 27950).unwrap();
        assert_eq!(a.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(a.port(), 27960);

        let b = parse_listen_address("[::1]", 27950).unwrap();
        assert_eq!(b.port(), 27950);
    }

    #[test]
    fn listen_bare_ipv6() {
        let a = parse_listen_address("::1", 27950).unwrap();
        assert_eq!(a.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(a.port(), 27950);
    }

    #[test]
    fn listen_garbage_rejected() {
        assert!(parse_listen_address("10.0.0.1:notaport", 27950).is_none());
    }

    // -------------------------------------------------------
    // resolve_ipv4
    // -------------------------------------------------------

    #[test]
    fn resolve_numeric_ipv4() {
        let a = resolve_ipv4("192.0.2.1").unwrap();
        assert_eq!(*a.ip(), Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(a.port(), 0);
    }

    #[test]
    fn resolve_numeric_ipv4_with_port() {
        let a = resolve_ipv4("192.0.2.1:27960").unwrap();
        assert_eq!(a.port(), 27960);
    }

    #[test]
    fn resolve_rejects_zero_port() {
        assert!(resolve_ipv4("192.0.2.1:0").is_none());
    }

    #[test]
    fn resolve_rejects_bad_port() {
        assert!(resolve_ipv4("192.0.2.1:high").is_none());
    }
}
