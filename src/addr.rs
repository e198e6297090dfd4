//! Peer-address normalization and CIDR matching.
//!
//! Every admission predicate — whitelist, blocklist, rate limit, geo-filter —
//! operates on the canonicalized form of a peer IP. Canonicalization strips
//! an IPv4-mapped IPv6 prefix (`::ffff:a.b.c.d` -> `a.b.c.d`) so that a dual-
//! stack listener never sees two different identities for the same client.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// A parsed blocklist/whitelist entry, tagged at load time so CIDR parsing
/// errors surface at startup instead of on the hot admission path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrEntry {
    /// An IPv4 or IPv6 network. `/0` matches every address in that family.
    Network(IpNetwork),
    /// A literal string match, used for any entry that doesn't parse as a
    /// network (plain non-IP strings, malformed CIDR text).
    Exact(String),
}

/// Strips a leading `::ffff:` IPv4-mapped prefix, case-insensitively.
///
/// Idempotent: calling `normalize` on an already-normalized address returns
/// the same string.
pub fn normalize(ip: &str) -> String {
    const PREFIX_LEN: usize = "::ffff:".len();
    if ip.len() > PREFIX_LEN && ip[..PREFIX_LEN].eq_ignore_ascii_case("::ffff:") {
        ip[PREFIX_LEN..].to_string()
    } else {
        ip.to_string()
    }
}

/// Parses a blocklist/whitelist entry.
///
/// Accepts `A.B.C.D`, `A.B.C.D/N`, a bare IPv6 literal, or IPv6 `addr/N`
/// CIDR notation, via [`ipnetwork::IpNetwork`] — the same parser the
/// teacher uses for its own CIDR blocklist (`parse_cidr_block` in
/// `src/config/server.rs`). A bare address is widened to its family's full
/// prefix (`/32` for IPv4, `/128` for IPv6) before being handed to
/// `IpNetwork`, since its `FromStr` expects CIDR notation. Anything that
/// still doesn't parse falls back to an exact-string-match entry.
pub fn parse_cidr(entry: &str) -> CidrEntry {
    let entry = entry.trim();

    if let Ok(network) = entry.parse::<IpNetwork>() {
        return CidrEntry::Network(network);
    }

    if !entry.contains('/') {
        if let Ok(addr) = entry.parse::<IpAddr>() {
            let full_prefix = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if let Ok(network) = IpNetwork::new(addr, full_prefix) {
                return CidrEntry::Network(network);
            }
        }
    }

    CidrEntry::Exact(entry.to_string())
}

/// Tests whether `ip` (already normalized) matches `entry`.
///
/// A network entry matches only an address of the same family; `/0`
/// matches every address in that family. Literal entries: byte-equal
/// comparison.
pub fn matches(ip: &str, entry: &CidrEntry) -> bool {
    match entry {
        CidrEntry::Exact(literal) => ip == literal,
        CidrEntry::Network(network) => match ip.parse::<IpAddr>() {
            Ok(candidate) => network.contains(candidate),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn normalize_strips_ipv4_mapped_prefix() {
        assert_eq!(normalize("::ffff:203.0.113.7"), "203.0.113.7");
        assert_eq!(normalize("::FFFF:203.0.113.7"), "203.0.113.7");
    }

    #[test]
    fn normalize_leaves_plain_addresses_alone() {
        assert_eq!(normalize("203.0.113.7"), "203.0.113.7");
        assert_eq!(normalize("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn normalize_is_idempotent() {
        for ip in ["::ffff:10.0.0.1", "10.0.0.1", "2001:db8::1"] {
            let once = normalize(ip);
            let twice = normalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn parses_plain_ipv4_as_slash_32() {
        assert_eq!(
            parse_cidr("10.0.0.50"),
            CidrEntry::Network(IpNetwork::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 50)), 32).unwrap())
        );
    }

    #[test]
    fn parses_ipv4_cidr() {
        assert_eq!(parse_cidr("10.0.0.0/24"), CidrEntry::Network("10.0.0.0/24".parse().unwrap()));
    }

    #[test]
    fn parses_plain_ipv6_as_full_prefix() {
        assert_eq!(parse_cidr("2001:db8::1"), CidrEntry::Network("2001:db8::1/128".parse().unwrap()));
    }

    #[test]
    fn ipv6_cidr_matches_the_declared_subnet() {
        let entry = parse_cidr("2001:db8::/32");
        assert!(matches("2001:db8::1", &entry));
        assert!(!matches("2001:db9::1", &entry));
    }

    #[test]
    fn invalid_entry_falls_back_to_exact() {
        assert_eq!(parse_cidr("not-an-ip/99"), CidrEntry::Exact("not-an-ip/99".to_string()));
    }

    #[test]
    fn cidr_slash_24_matches_subnet() {
        let entry = parse_cidr("10.0.0.0/24");
        assert!(matches("10.0.0.50", &entry));
        assert!(!matches("10.0.1.1", &entry));
    }

    #[test]
    fn cidr_slash_0_matches_everything_in_family_only() {
        let entry = parse_cidr("0.0.0.0/0");
        assert!(matches("1.2.3.4", &entry));
        assert!(matches("255.255.255.255", &entry));
        assert!(!matches("2001:db8::1", &entry), "an IPv4 /0 must not match an IPv6 address");
    }

    #[test]
    fn ipv4_entry_never_matches_non_ipv4() {
        let entry = parse_cidr("10.0.0.0/8");
        assert!(!matches("2001:db8::1", &entry));
    }

    #[test]
    fn exact_entry_is_byte_equal() {
        let entry = CidrEntry::Exact("not-an-address".to_string());
        assert!(matches("not-an-address", &entry));
        assert!(!matches("also-not-an-address", &entry));
    }

    #[test]
    fn matches_depends_only_on_first_n_bits() {
        let entry = parse_cidr("192.168.1.0/30");
        for host in 0u8..4 {
            let ip = format!("192.168.1.{host}");
            assert!(matches(&ip, &entry));
        }
        assert!(!matches("192.168.1.4", &entry));
    }
}
