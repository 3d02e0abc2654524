use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

/// A peer address as reported by the host.
///
/// Three wire forms are accepted: a bracketed IPv6 literal with an
/// optional `:port`, a `unix:` path, and a dotted IPv4 address with an
/// optional `:port`. The `unix:` prefix is kept as part of the path,
/// which makes formatting the address reproduce the wire form exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl Address {
    // `with_port` distinguishes the link-connect src/dst fields (which
    // carry a port) from the connect filter address (which does not).
    // An inet address without a port keeps port 0.
    pub(crate) fn parse(s: &str, with_port: bool) -> Option<Address> {
        if let Some(inner) = s.strip_prefix('[') {
            let (ip_s, port) = if with_port {
                let (head, port_s) = s.rsplit_once(':')?;
                let ip_s = head.strip_prefix('[')?.strip_suffix(']')?;
                (ip_s, port_s.parse::<u16>().ok()?)
            } else {
                (inner.strip_suffix(']')?, 0)
            };
            let ip: Ipv6Addr = ip_s.parse().ok()?;
            Some(Address::Inet(SocketAddr::new(IpAddr::V6(ip), port)))
        } else if s.len() >= 5 && s[..5].eq_ignore_ascii_case("unix:") {
            Some(Address::Unix(PathBuf::from(s)))
        } else {
            let (ip_s, port) = if with_port {
                let (head, port_s) = s.rsplit_once(':')?;
                (head, port_s.parse::<u16>().ok()?)
            } else {
                (s, 0)
            };
            let ip: Ipv4Addr = ip_s.parse().ok()?;
            Some(Address::Inet(SocketAddr::new(IpAddr::V4(ip), port)))
        }
    }

    /// The IP address, if this is an inet address.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::Inet(sa) => Some(sa.ip()),
            Address::Unix(_) => None,
        }
    }

    /// The port, if this is an inet address with one.
    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Inet(sa) if sa.port() != 0 => Some(sa.port()),
            _ => None,
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Address::Unix(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "{}", path.display()),
            Address::Inet(sa) => match (sa.ip(), sa.port()) {
                (IpAddr::V6(ip), 0) => write!(f, "[{ip}]"),
                (IpAddr::V6(ip), port) => write!(f, "[{ip}]:{port}"),
                (IpAddr::V4(ip), 0) => write!(f, "{ip}"),
                (IpAddr::V4(ip), port) => write!(f, "{ip}:{port}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_with_port() {
        let addr = Address::parse("[2001:db8::1]:587", true).unwrap();
        assert_eq!(addr.ip(), Some("2001:db8::1".parse::<IpAddr>().unwrap()));
        assert_eq!(addr.port(), Some(587));
        assert_eq!(addr.to_string(), "[2001:db8::1]:587");
    }

    #[test]
    fn ipv6_without_port() {
        let addr = Address::parse("[::1]", false).unwrap();
        assert_eq!(addr.ip(), Some("::1".parse::<IpAddr>().unwrap()));
        assert_eq!(addr.port(), None);
        assert_eq!(addr.to_string(), "[::1]");
    }

    #[test]
    fn unix_socket_keeps_full_string() {
        let addr = Address::parse("unix:/var/run/smtpd.sock", true).unwrap();
        assert!(addr.is_unix());
        assert_eq!(addr.ip(), None);
        assert_eq!(addr.to_string(), "unix:/var/run/smtpd.sock");
    }

    #[test]
    fn ipv4_with_port() {
        let addr = Address::parse("192.0.2.1:25", true).unwrap();
        assert_eq!(addr.ip(), Some("192.0.2.1".parse::<IpAddr>().unwrap()));
        assert_eq!(addr.port(), Some(25));
        assert_eq!(addr.to_string(), "192.0.2.1:25");
    }

    #[test]
    fn ipv4_without_port() {
        let addr = Address::parse("10.0.0.1", false).unwrap();
        assert_eq!(addr.to_string(), "10.0.0.1");
    }

    #[test]
    fn malformed_addresses() {
        // Port demanded but absent
        assert_eq!(Address::parse("192.0.2.1", true), None);
        assert_eq!(Address::parse("[2001:db8::1]", true), None);
        // Unbalanced brackets
        assert_eq!(Address::parse("[2001:db8::1:25", true), None);
        // Not an address at all
        assert_eq!(Address::parse("example.com:25", true), None);
        assert_eq!(Address::parse("", false), None);
    }
}
