//! Address and prefix parsing utilities.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

/// Error type for address parsing.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// An IPv4 or IPv6 CIDR prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    /// Create a prefix, validating the length against the address family.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(AddrError::InvalidPrefix(format!(
                "{} exceeds maximum {} for address family",
                len, max
            )));
        }
        Ok(Self { addr, len })
    }

    /// The prefix address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// A host prefix has no free host bits (IPv4 /32 or IPv6 /128).
    pub fn is_host(&self) -> bool {
        match self.addr {
            IpAddr::V4(_) => self.len == 32,
            IpAddr::V6(_) => self.len == 128,
        }
    }

    /// Check whether an IPv6 address falls inside this (IPv6) prefix.
    pub fn contains_v6(&self, addr: Ipv6Addr) -> bool {
        let IpAddr::V6(prefix_addr) = self.addr else {
            return false;
        };
        if self.len == 0 {
            return true;
        }
        let mask = !0u128 << (128 - self.len as u32);
        (u128::from(addr) & mask) == (u128::from(prefix_addr) & mask)
    }
}

impl FromStr for Prefix {
    type Err = AddrError;

    /// Parse CIDR notation. A bare address is a host prefix.
    fn from_str(s: &str) -> Result<Self> {
        if let Some((addr_str, len_str)) = s.split_once('/') {
            let addr: IpAddr = addr_str
                .parse()
                .map_err(|_| AddrError::InvalidAddress(addr_str.to_string()))?;
            let len: u8 = len_str
                .parse()
                .map_err(|_| AddrError::InvalidPrefix(len_str.to_string()))?;
            Self::new(addr, len)
        } else {
            let addr: IpAddr = s
                .parse()
                .map_err(|_| AddrError::InvalidAddress(s.to_string()))?;
            let len = if addr.is_ipv4() { 32 } else { 128 };
            Ok(Self { addr, len })
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// Parse an ordered SRv6 segment list. Order is significant and the list
/// must not be empty.
pub fn parse_segments(segments: &[String]) -> Result<Vec<Ipv6Addr>> {
    if segments.is_empty() {
        return Err(AddrError::InvalidAddress("empty segment list".into()));
    }
    segments
        .iter()
        .map(|s| {
            s.parse::<Ipv6Addr>()
                .map_err(|_| AddrError::InvalidAddress(s.clone()))
        })
        .collect()
}
