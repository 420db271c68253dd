//! Networks and their membership.

use super::address::Prefix;
use crate::error::{EmuError, Result};
use crate::registry::{ObjectKind, RegistryKey, Scope};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// First host offset handed out to hosts on a local network.
pub const HOST_ADDRESS_START: u32 = 71;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    /// Intra-AS network
    Local,
    /// Peering LAN of an internet exchange
    Exchange,
}

/// A node attached to a network, with the address it holds there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub node: RegistryKey,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub scope: Scope,
    pub kind: NetworkKind,
    pub prefix: Prefix,
    members: Vec<Member>,
}

impl Network {
    pub fn local(name: impl Into<String>, asn: u32, prefix: Prefix) -> Self {
        Network {
            name: name.into(),
            scope: Scope::Asn(asn),
            kind: NetworkKind::Local,
            prefix,
            members: Vec::new(),
        }
    }

    pub fn exchange(ix: u32, prefix: Prefix) -> Self {
        Network {
            name: format!("ix{}", ix),
            scope: Scope::Ix,
            kind: NetworkKind::Exchange,
            prefix,
            members: Vec::new(),
        }
    }

    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(self.scope, ObjectKind::Network, self.name.clone())
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_address(&self, node: &RegistryKey) -> Option<Ipv4Addr> {
        self.members
            .iter()
            .find(|m| &m.node == node)
            .map(|m| m.address)
    }

    pub fn is_address_used(&self, address: Ipv4Addr) -> bool {
        self.members.iter().any(|m| m.address == address)
    }

    /// Record `node` as attached at `address`.
    pub(crate) fn attach(&mut self, node: RegistryKey, address: Ipv4Addr) -> Result<()> {
        if !self.prefix.contains(address) {
            return Err(EmuError::Topology(format!(
                "address {} of {} is outside {} ({})",
                address, node, self.key(), self.prefix
            )));
        }
        if let Some(existing) = self.members.iter().find(|m| m.address == address) {
            return Err(EmuError::Topology(format!(
                "address {} on {} is already held by {}",
                address,
                self.key(),
                existing.node
            )));
        }
        if self.members.iter().any(|m| m.node == node) {
            return Err(EmuError::Topology(format!("{} is already attached to {}", node, self.key())));
        }
        self.members.push(Member { node, address });
        Ok(())
    }

    /// Lowest free host address at or above `start`.
    pub fn next_free_from(&self, start: u32) -> Option<Ipv4Addr> {
        (start..)
            .map_while(|n| self.prefix.host(n))
            .find(|addr| !self.is_address_used(*addr))
    }

    /// Highest free host address, walking down from the top of the prefix.
    pub fn next_free_from_top(&self) -> Option<Ipv4Addr> {
        let top = u32::try_from(self.prefix.size().saturating_sub(2)).ok()?;
        (1..=top)
            .rev()
            .filter_map(|n| self.prefix.host(n))
            .find(|addr| !self.is_address_used(*addr))
    }
}

/// Connect `node` to `network` at `address`, updating both sides.
pub fn connect(
    registry: &mut crate::registry::Registry,
    node: &RegistryKey,
    network: &RegistryKey,
    address: Ipv4Addr,
) -> Result<()> {
    // Validate the node first so a failed lookup leaves the network untouched
    registry.node(node)?;
    registry.network_mut(network)?.attach(node.clone(), address)?;
    registry.node_mut(node)?.interfaces.push(super::Interface {
        network: network.clone(),
        address,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net0() -> Network {
        Network::local("net0", 150, "10.150.0.0/24".parse().unwrap())
    }

    #[test]
    fn test_attach_rejects_conflicts() {
        let mut net = net0();
        let web = RegistryKey::new(150, ObjectKind::Host, "web");
        let db = RegistryKey::new(150, ObjectKind::Host, "db");

        net.attach(web.clone(), Ipv4Addr::new(10, 150, 0, 71)).unwrap();
        assert!(net.attach(db.clone(), Ipv4Addr::new(10, 150, 0, 71)).is_err());
        assert!(net.attach(db.clone(), Ipv4Addr::new(10, 151, 0, 71)).is_err());
        assert!(net.attach(web.clone(), Ipv4Addr::new(10, 150, 0, 72)).is_err());
        assert_eq!(net.member_address(&web), Some(Ipv4Addr::new(10, 150, 0, 71)));
    }

    #[test]
    fn test_free_address_allocation() {
        let mut net = net0();
        assert_eq!(net.next_free_from(HOST_ADDRESS_START), Some(Ipv4Addr::new(10, 150, 0, 71)));
        assert_eq!(net.next_free_from_top(), Some(Ipv4Addr::new(10, 150, 0, 254)));

        net.attach(RegistryKey::new(150, ObjectKind::Host, "a"), Ipv4Addr::new(10, 150, 0, 71))
            .unwrap();
        net.attach(RegistryKey::new(150, ObjectKind::Router, "r"), Ipv4Addr::new(10, 150, 0, 254))
            .unwrap();
        assert_eq!(net.next_free_from(HOST_ADDRESS_START), Some(Ipv4Addr::new(10, 150, 0, 72)));
        assert_eq!(net.next_free_from_top(), Some(Ipv4Addr::new(10, 150, 0, 253)));
        assert_eq!(net.next_free_from(255), None);
    }
}
