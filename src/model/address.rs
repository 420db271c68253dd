use crate::error::EmuError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// IPv4 CIDR prefix such as `10.150.0.0/24`.
///
/// Host bits in the parsed address are masked off, so `10.150.0.7/24`
/// and `10.150.0.0/24` are the same prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    network: Ipv4Addr,
    len: u8,
}

impl Prefix {
    pub fn new(address: Ipv4Addr, len: u8) -> Result<Self, EmuError> {
        if len > 32 {
            return Err(EmuError::InvalidPrefix(format!("{}/{}", address, len)));
        }
        let network = Ipv4Addr::from(u32::from(address) & Self::mask_bits(len));
        Ok(Prefix { network, len })
    }

    fn mask_bits(len: u8) -> u32 {
        if len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(len))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_bits(self.len))
    }

    /// Number of addresses in the prefix, network and broadcast included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.len))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask_bits(self.len) == u32::from(self.network)
    }

    /// True when the two prefixes share at least one address.
    pub fn overlaps(&self, other: &Prefix) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }

    /// The `n`-th usable host address, `None` when `n` falls on the
    /// network/broadcast address or outside the prefix.
    pub fn host(&self, n: u32) -> Option<Ipv4Addr> {
        if n == 0 || u64::from(n) >= self.size().saturating_sub(1) {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + n))
    }

    /// Offset of `ip` within the prefix.
    pub fn offset_of(&self, ip: Ipv4Addr) -> Option<u32> {
        if self.contains(ip) {
            Some(u32::from(ip) - u32::from(self.network))
        } else {
            None
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

impl FromStr for Prefix {
    type Err = EmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| EmuError::InvalidPrefix(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| EmuError::InvalidPrefix(s.to_string()))?;
        let len: u8 = len
            .trim()
            .parse()
            .map_err(|_| EmuError::InvalidPrefix(s.to_string()))?;
        Prefix::new(addr, len)
    }
}

impl TryFrom<String> for Prefix {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e: EmuError| e.to_string())
    }
}

impl From<Prefix> for String {
    fn from(prefix: Prefix) -> Self {
        prefix.to_string()
    }
}
