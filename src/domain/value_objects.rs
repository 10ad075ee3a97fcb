//! Value Objects - Immutable domain primitives
//!
//! Address classification and the numeric IPv4 encoding shared by the
//! stores' range columns.

use crate::error::ConfigError;
use regex::Regex;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::sync::OnceLock;

const IPV4_PATTERN: &str =
    r"^(25[0-5]|2[0-4]\d|[0-1]?\d?\d)(\.(25[0-5]|2[0-4]\d|[0-1]?\d?\d)){3}$";
const IPV6_STD_PATTERN: &str = r"^(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}$";
const IPV6_HEX_COMPRESSED_PATTERN: &str = r"^((?:[0-9A-Fa-f]{1,4}(?::[0-9A-Fa-f]{1,4})*)?)::((?:[0-9A-Fa-f]{1,4}(?::[0-9A-Fa-f]{1,4})*)?)$";

fn compile(slot: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    slot.get_or_init(|| Regex::new(pattern).expect("address pattern compiles"))
}

fn ipv4_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(&RE, IPV4_PATTERN)
}

fn ipv6_std_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(&RE, IPV6_STD_PATTERN)
}

fn ipv6_compressed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(&RE, IPV6_HEX_COMPRESSED_PATTERN)
}

/// Textual form of an address as seen by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpKind {
    Ipv4,
    Ipv6,
    /// Dotted IPv4 network followed by `/prefix`
    Cidr,
    Invalid,
}

/// Classify an address string. No trimming is applied.
pub fn classify(s: &str) -> IpKind {
    if let Some((addr, prefix)) = s.split_once('/') {
        let prefix_ok = !prefix.is_empty()
            && prefix.len() <= 2
            && prefix.bytes().all(|b| b.is_ascii_digit())
            && prefix.parse::<u8>().map_or(false, |p| p <= 32);
        return if prefix_ok && ipv4_regex().is_match(addr) {
            IpKind::Cidr
        } else {
            IpKind::Invalid
        };
    }

    if ipv4_regex().is_match(s) {
        IpKind::Ipv4
    } else if ipv6_std_regex().is_match(s)
        || ipv6_compressed_regex().is_match(s)
        || s.parse::<Ipv6Addr>().is_ok()
    {
        IpKind::Ipv6
    } else {
        IpKind::Invalid
    }
}

/// True if `s` is a plain IPv4 or IPv6 address (CIDR blocks excluded).
pub fn is_ip_address(s: &str) -> bool {
    matches!(classify(s), IpKind::Ipv4 | IpKind::Ipv6)
}

/// Big-endian weighted sum of the four octets.
///
/// The input must classify as [`IpKind::Ipv4`]; anything else is a caller
/// bug and yields an unspecified value.
pub fn encode_ipv4_to_long(ip: &str) -> u32 {
    debug_assert_eq!(classify(ip), IpKind::Ipv4, "not an IPv4 address: {ip}");
    ip.split('.')
        .take(4)
        .map(|octet| octet.parse::<u32>().unwrap_or(0))
        .fold(0u32, |acc, octet| (acc << 8) | (octet & 0xff))
}

/// First two octets of a dotted IPv4 address (`"192.168.1.1"` -> `"192.168"`).
///
/// Used as a coarse index predicate on the network block table.
pub fn coarse_prefix(ip: &str) -> Option<&str> {
    let mut dots = ip.match_indices('.').map(|(i, _)| i);
    let _ = dots.next()?;
    let second = dots.next()?;
    Some(&ip[..second])
}

/// Which store implementation backs a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolverKind {
    /// Relational network-block tables (SQLite)
    #[default]
    Rdbms,
    /// MaxMind GeoIP2/GeoLite2 database file
    MaxMind,
}

impl ResolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rdbms => "rdbms",
            Self::MaxMind => "maxmind",
        }
    }
}

impl FromStr for ResolverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rdbms" | "sqlite" => Ok(Self::Rdbms),
            "maxmind" | "mmdb" => Ok(Self::MaxMind),
            _ => Err(ConfigError::UnknownResolver {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
