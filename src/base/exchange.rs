//! Internet exchange definitions.

use crate::error::{EmuError, Result};
use crate::model::Prefix;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A shared peering LAN, optionally with a route server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetExchange {
    pub id: u32,
    pub prefix: Prefix,
    pub route_server: bool,
}

impl InternetExchange {
    /// Exchange with the conventional `10.{id}.0.0/24` peering LAN.
    pub fn new(id: u32) -> Result<Self> {
        let octet = u8::try_from(id).map_err(|_| {
            EmuError::Topology(format!("IX{}: cannot pick a prefix automatically; specify one", id))
        })?;
        Ok(Self::with_prefix(id, Prefix::new(Ipv4Addr::new(10, 0, octet, 0), 24)?))
    }

    pub fn with_prefix(id: u32, prefix: Prefix) -> Self {
        InternetExchange {
            id,
            prefix,
            route_server: true,
        }
    }

    pub fn name(&self) -> String {
        format!("ix{}", self.id)
    }

    /// Conventional peering address of a member AS: the ASN as host offset.
    pub fn member_address(&self, asn: u32) -> Option<Ipv4Addr> {
        self.prefix.host(asn)
    }
}
